use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// The page sizes offered by the rows-per-page menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u32")]
pub enum PageSize {
    #[default]
    P100,
    P500,
    P1000,
    P5000,
    P10000,
}

impl PageSize {
    pub const ALL: [PageSize; 5] = [
        PageSize::P100,
        PageSize::P500,
        PageSize::P1000,
        PageSize::P5000,
        PageSize::P10000,
    ];

    pub fn get(self) -> usize {
        match self {
            PageSize::P100 => 100,
            PageSize::P500 => 500,
            PageSize::P1000 => 1000,
            PageSize::P5000 => 5000,
            PageSize::P10000 => 10000,
        }
    }
}

impl TryFrom<u32> for PageSize {
    type Error = String;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|s| s.get() == n as usize)
            .ok_or_else(|| format!("page size must be one of 100, 500, 1000, 5000, 10000 (got {})", n))
    }
}

impl FromStr for PageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid page size '{}'", s.trim()))?;
        Self::try_from(n)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Number of pages for `len` rows; never less than one.
pub fn total_pages(len: usize, size: PageSize) -> usize {
    len.div_ceil(size.get()).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    pub page: usize,
    pub total_pages: usize,
}

/// Slices one page out of `view`, clamping `page` into `[1, total_pages]`.
pub fn paginate<T>(view: &[T], size: PageSize, page: usize) -> Page<'_, T> {
    let total = total_pages(view.len(), size);
    let page = page.clamp(1, total);
    let start = ((page - 1) * size.get()).min(view.len());
    let end = (start + size.get()).min(view.len());
    Page {
        items: &view[start..end],
        page,
        total_pages: total,
    }
}

/// Current-page cursor plus page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    size: PageSize,
    page: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(PageSize::default())
    }
}

impl Paginator {
    pub fn new(size: PageSize) -> Self {
        Self { size, page: 1 }
    }

    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn reset(&mut self) {
        self.page = 1;
    }

    pub fn set_size(&mut self, size: PageSize) {
        self.size = size;
        self.page = 1;
    }

    pub fn next(&mut self, len: usize) {
        self.page = (self.page + 1).min(total_pages(len, self.size));
    }

    pub fn prev(&mut self) {
        self.page = self.page.saturating_sub(1).max(1);
    }

    /// Jumps to `page`, clamped into range.
    pub fn goto(&mut self, page: usize, len: usize) {
        self.page = page.clamp(1, total_pages(len, self.size));
    }

    /// Page-number text entry: only an integer within range is accepted,
    /// anything else resets to page 1.
    pub fn goto_input(&mut self, input: &str, len: usize) {
        let total = total_pages(len, self.size);
        self.page = match input.trim().parse::<usize>() {
            Ok(n) if (1..=total).contains(&n) => n,
            _ => 1,
        };
    }

    /// Keeps the cursor valid after the data shrinks.
    pub fn clamp(&mut self, len: usize) {
        self.page = self.page.clamp(1, total_pages(len, self.size));
    }

    pub fn slice<'a, T>(&self, view: &'a [T]) -> Page<'a, T> {
        paginate(view, self.size, self.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_has_one_page() {
        let view: Vec<u32> = Vec::new();
        let p = paginate(&view, PageSize::P100, 1);
        assert_eq!(p.total_pages, 1);
        assert!(p.items.is_empty());
    }

    #[test]
    fn last_page_is_partial_and_out_of_range_clamps() {
        let view: Vec<u32> = (1..=250).collect();
        let p = paginate(&view, PageSize::P100, 3);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.items.len(), 50);
        assert_eq!(p.items.first(), Some(&201));
        assert_eq!(p.items.last(), Some(&250));

        let p = paginate(&view, PageSize::P100, 4);
        assert_eq!(p.page, 3);
        let p = paginate(&view, PageSize::P100, 0);
        assert_eq!(p.page, 1);
        assert_eq!(p.items.first(), Some(&1));
    }

    #[test]
    fn navigation_stays_in_bounds() {
        let mut pg = Paginator::new(PageSize::P100);
        pg.prev();
        assert_eq!(pg.page(), 1);
        for _ in 0..5 {
            pg.next(250);
        }
        assert_eq!(pg.page(), 3);
        pg.clamp(120);
        assert_eq!(pg.page(), 2);
    }

    #[test]
    fn page_input_accepts_only_valid_numbers() {
        let mut pg = Paginator::new(PageSize::P100);
        pg.goto_input("2", 250);
        assert_eq!(pg.page(), 2);
        pg.goto_input("9", 250);
        assert_eq!(pg.page(), 1);
        pg.goto_input("3", 250);
        pg.goto_input("abc", 250);
        assert_eq!(pg.page(), 1);
        pg.goto_input("0", 250);
        assert_eq!(pg.page(), 1);
    }

    #[test]
    fn changing_size_resets_page() {
        let mut pg = Paginator::new(PageSize::P100);
        pg.goto(3, 250);
        pg.set_size(PageSize::P500);
        assert_eq!(pg.page(), 1);
        assert_eq!(pg.size().get(), 500);
    }

    #[test]
    fn only_listed_sizes_parse() {
        assert_eq!("1000".parse::<PageSize>().unwrap(), PageSize::P1000);
        assert!("250".parse::<PageSize>().is_err());
    }
}
