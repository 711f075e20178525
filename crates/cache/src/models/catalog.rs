/// One row of the companion catalog's `Books` table, already normalized by
/// the query (numeric casts, flags as booleans).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CatalogRow {
    pub(crate) id: i64,
    pub(crate) title: Option<String>,
    pub(crate) author: Option<String>,
    pub(crate) author_sort: Option<String>,
    pub(crate) cover_hash: Option<String>,
    pub(crate) series: Option<String>,
    pub(crate) series_index: f64,
    pub(crate) title_sort: Option<String>,
    pub(crate) date_added: Option<i64>,
    pub(crate) date_published: Option<i64>,
    pub(crate) description: Option<String>,
    pub(crate) filename: Option<String>,
    pub(crate) hash: Option<String>,
    pub(crate) is_read: bool,
    pub(crate) new_flag: bool,
    pub(crate) publisher: Option<String>,
    pub(crate) reading_list: bool,
    pub(crate) uuid: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CollectionRow {
    pub(crate) book_id: i64,
    pub(crate) name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubjectRow {
    pub(crate) book_id: i64,
    pub(crate) subject: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TitleRow {
    pub(crate) title: String,
    pub(crate) author: String,
}
