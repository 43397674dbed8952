use serde::Serialize;

use crate::validator::{Validator, permitted_value};

#[derive(Debug, Clone)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Filters {
    /// 排序字段必须在白名单内，调用前应先通过 [`validate_filters`]
    pub fn sort_column(&self) -> &str {
        if permitted_value(&self.sort.as_str(), self.sort_safelist) {
            self.sort.trim_start_matches('-')
        } else {
            "id"
        }
    }

    pub fn sort_descending(&self) -> bool {
        self.sort.starts_with('-')
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort_descending() { "DESC" } else { "ASC" }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

pub fn validate_filters(v: &mut Validator, f: &Filters) {
    v.check(f.page > 0, "page", "must be greater than zero");
    v.check(f.page <= 10_000_000, "page", "must be a maximum of 10 million");
    v.check(f.page_size > 0, "page_size", "must be greater than zero");
    v.check(f.page_size <= 100, "page_size", "must be a maximum of 100");
    v.check(
        permitted_value(&f.sort.as_str(), f.sort_safelist),
        "sort",
        "invalid sort value",
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

pub fn calculate_metadata(total_records: i64, page: i64, page_size: i64) -> Metadata {
    if total_records == 0 {
        return Metadata::default();
    }

    Metadata {
        current_page: page,
        page_size,
        first_page: 1,
        last_page: (total_records + page_size - 1) / page_size,
        total_records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFELIST: &[&str] = &["id", "title", "-id", "-title"];

    fn filters(page: i64, page_size: i64, sort: &str) -> Filters {
        Filters {
            page,
            page_size,
            sort: sort.into(),
            sort_safelist: SAFELIST,
        }
    }

    #[test]
    fn sort_and_paging() {
        let f = filters(3, 20, "-title");
        assert_eq!(f.sort_column(), "title");
        assert_eq!(f.sort_direction(), "DESC");
        assert_eq!(f.offset(), 40);
        assert_eq!(f.limit(), 20);
    }

    #[test]
    fn unsafe_sort_falls_back_to_id() {
        let f = filters(1, 20, "title; DROP TABLE movies");
        assert_eq!(f.sort_column(), "id");

        let mut v = Validator::new();
        validate_filters(&mut v, &f);
        assert_eq!(v.errors["sort"], "invalid sort value");
    }

    #[test]
    fn page_bounds() {
        let mut v = Validator::new();
        validate_filters(&mut v, &filters(0, 101, "id"));
        assert!(v.errors.contains_key("page"));
        assert!(v.errors.contains_key("page_size"));
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let metadata = calculate_metadata(41, 2, 20);
        assert_eq!(metadata.last_page, 3);
        assert_eq!(metadata.first_page, 1);
        assert_eq!(calculate_metadata(0, 1, 20), Metadata::default());
    }
}
