use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: i64,
    pub per_page: i64,
    pub current_page: i64,
    pub last_page: i64,
    pub first_page: i64,
    pub next_page: Option<i64>,
    pub prev_page: Option<i64>,
}

impl PageMeta {
    pub fn new(total: i64, per_page: i64, current_page: i64) -> Self {
        let last_page = if total == 0 {
            1
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            total,
            per_page,
            current_page,
            last_page,
            first_page: 1,
            next_page: (current_page < last_page).then(|| current_page + 1),
            prev_page: (current_page > 1).then(|| current_page - 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}
