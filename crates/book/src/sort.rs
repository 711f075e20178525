//! Sort keys for titles and author names.

const ARTICLES: [&str; 3] = ["The", "An", "A"];

/// Move a leading English article to the end: "The Hobbit" becomes
/// "Hobbit, The".
pub fn title_sort(title: &str) -> String {
    let title = title.trim();
    for article in ARTICLES {
        if let Some(rest) = title.strip_prefix(article)
            && rest.starts_with(' ')
        {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return format!("{rest}, {article}");
            }
        }
    }
    title.to_string()
}

/// "Ursula K. Le Guin" becomes "Guin, Ursula K. Le". Names that already
/// contain a comma are assumed to be in sort form.
pub fn author_sort(author: &str) -> String {
    let author = author.trim();
    if author.contains(',') {
        return author.to_string();
    }
    match author.rsplit_once(' ') {
        Some((given, family)) => format!("{family}, {given}"),
        None => author.to_string(),
    }
}

/// Sort form of every author, joined with " & ".
pub fn authors_sort(authors: &[String]) -> String {
    authors.iter().map(|a| author_sort(a)).collect::<Vec<_>>().join(" & ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("The Hobbit", "Hobbit, The")]
    #[case("A Wizard of Earthsea", "Wizard of Earthsea, A")]
    #[case("An Unkindness of Ghosts", "Unkindness of Ghosts, An")]
    #[case("Theory of Everything", "Theory of Everything")]
    #[case("The", "The")]
    #[case("  Dune ", "Dune")]
    fn test_title_sort(#[case] title: &str, #[case] expected: &str) {
        assert_eq!(title_sort(title), expected);
    }

    #[rstest]
    #[case("Frank Herbert", "Herbert, Frank")]
    #[case("Herbert, Frank", "Herbert, Frank")]
    #[case("Plato", "Plato")]
    fn test_author_sort(#[case] author: &str, #[case] expected: &str) {
        assert_eq!(author_sort(author), expected);
    }

    #[test]
    fn test_authors_sort_joins() {
        let authors = vec!["Terry Pratchett".to_string(), "Neil Gaiman".to_string()];
        assert_eq!(authors_sort(&authors), "Pratchett, Terry & Gaiman, Neil");
    }
}
