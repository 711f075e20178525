use derive_more::Display;

/// Reserved collection names the companion app maps onto per-book flags.
///
/// They travel through `device_collections` like any other collection, but
/// survive a collection replacement: replacing a book's collections with the
/// library's never drops an active flag.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionFlag {
    #[display("NEW")]
    New,
    #[display("READ")]
    Read,
    #[display("READING LIST")]
    ReadingList,
}

impl CollectionFlag {
    pub const ALL: [Self; 3] = [Self::New, Self::Read, Self::ReadingList];

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Read => "READ",
            Self::ReadingList => "READING LIST",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }

    /// Reserved flags present in `collections`, in [`ALL`](Self::ALL) order.
    pub fn active_in(collections: &[String]) -> Vec<String> {
        Self::ALL
            .into_iter()
            .filter(|flag| collections.iter().any(|c| c == flag.label()))
            .map(|flag| flag.label().to_string())
            .collect()
    }
}
