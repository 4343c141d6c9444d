use std::str::FromStr;

use crate::auth::Capabilities;
use crate::error::{Error, Result};
use crate::model::{Amount, Fine};
use crate::view::SortDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FineSort {
    #[default]
    EventTitle,
    Amount,
}

impl FromStr for FineSort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" | "title" | "eventtitle" | "event_title" => Ok(FineSort::EventTitle),
            "amount" => Ok(FineSort::Amount),
            other => Err(format!("unknown fine sort '{}'", other)),
        }
    }
}

pub fn sort_fines(fines: &mut [Fine], key: FineSort, direction: SortDirection) {
    fines.sort_by(|a, b| {
        let ord = match key {
            FineSort::EventTitle => a.event_title.cmp(&b.event_title),
            FineSort::Amount => a.amount.cmp(&b.amount),
        };
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

pub fn total_unpaid(fines: &[Fine]) -> Amount {
    fines.iter().filter(|f| !f.is_paid).map(|f| f.amount).sum()
}

/// Who may change a fine's paid flag. Anyone signed in may mark a fine paid;
/// reverting needs both the config switch and the role.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinePolicy {
    pub allow_unpay: bool,
}

impl FinePolicy {
    pub fn check(&self, caps: &Capabilities, paid: bool) -> Result<()> {
        if paid {
            return Ok(());
        }
        if !self.allow_unpay {
            return Err(Error::validation(
                "fine",
                "paid fines cannot be marked unpaid",
            ));
        }
        if !caps.can_unpay_fines {
            return Err(Error::Forbidden("mark fines unpaid"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventId, FineId, Role};

    fn fine(title: &str, cents: i64, paid: bool) -> Fine {
        Fine {
            id: FineId::from(title),
            event_id: EventId::from(title),
            event_title: title.into(),
            amount: Amount::from_cents(cents),
            is_paid: paid,
        }
    }

    #[test]
    fn unpaid_total_skips_paid() {
        let fines = vec![fine("A", 5000, false), fine("B", 2550, true), fine("C", 1025, false)];
        assert_eq!(total_unpaid(&fines).to_string(), "60.25");
        assert_eq!(total_unpaid(&[]).to_string(), "0.00");
    }

    #[test]
    fn unpaid_total_saturates() {
        let fines = vec![fine("A", i64::MAX, false), fine("B", i64::MAX, false)];
        assert_eq!(total_unpaid(&fines).cents(), i64::MAX);
    }

    #[test]
    fn sorts_by_amount_desc() {
        let mut fines = vec![fine("A", 100, false), fine("B", 300, false), fine("C", 200, true)];
        sort_fines(&mut fines, FineSort::Amount, SortDirection::Desc);
        let titles: Vec<_> = fines.iter().map(|f| f.event_title.as_str()).collect();
        assert_eq!(titles, ["B", "C", "A"]);
        sort_fines(&mut fines, FineSort::EventTitle, SortDirection::Asc);
        assert_eq!(fines[0].event_title, "A");
    }

    #[test]
    fn unpay_needs_switch_and_role() {
        let viewer = Role::Viewer.capabilities();
        let admin = Role::Administrator.capabilities();
        let off = FinePolicy::default();
        let on = FinePolicy { allow_unpay: true };
        assert!(off.check(&viewer, true).is_ok());
        assert!(off.check(&admin, false).is_err());
        assert!(matches!(on.check(&viewer, false), Err(Error::Forbidden(_))));
        assert!(on.check(&admin, false).is_ok());
    }
}
