use crate::platform::{NewItem, RemoteItem, Side, SourceMetadata};

/// Label added to issues mirrored onto GitHub from Radicle.
pub const FROM_RADICLE_LABEL: &str = "from-radicle";

const EMPTY_BODY: &str = "No description provided.";

/// Build the create payload for mirroring `item` from `source_platform` onto
/// the `target` side. The body keeps the original text between a header
/// naming the origin and a footer with the author, creation time and a link
/// back.
pub fn mirror_payload(source_platform: &str, item: &RemoteItem, target: Side) -> NewItem {
    let source = SourceMetadata {
        platform: source_platform.to_string(),
        id: item.id.clone(),
        author: item.author.clone(),
        created_at: item.created_at,
        url: item.url.clone(),
    };

    let mut labels = item.labels.clone();
    if target == Side::B && !labels.iter().any(|l| l == FROM_RADICLE_LABEL) {
        labels.push(FROM_RADICLE_LABEL.to_string());
    }

    NewItem {
        title: item.title.clone(),
        body: format_body(item, &source),
        labels,
        source,
    }
}

fn item_reference(source: &SourceMetadata) -> String {
    if source.id.chars().all(|c| c.is_ascii_digit()) {
        format!("#{}", source.id)
    } else {
        source.id.clone()
    }
}

fn format_body(item: &RemoteItem, source: &SourceMetadata) -> String {
    let original = item.body.trim();
    let mut body = format!(
        "**Originally from {} issue {}**\n\n",
        source.platform,
        item_reference(source)
    );
    body.push_str(if original.is_empty() { EMPTY_BODY } else { original });
    body.push_str("\n\n---\n\n");

    let author = if source.author.is_empty() {
        "unknown"
    } else {
        source.author.as_str()
    };
    body.push_str(&format!("Author: {author}\n"));
    if let Some(created) = source.created_at {
        body.push_str(&format!("Created: {}\n", created.to_rfc3339()));
    }
    if let Some(url) = &source.url {
        body.push_str(&format!("Source: {url}\n"));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn github_issue() -> RemoteItem {
        let mut item = RemoteItem::new("12", "Crash on start");
        item.body = "Steps to reproduce...".to_string();
        item.author = "octocat".to_string();
        item.created_at = Some(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        item.url = Some("https://github.com/o/r/issues/12".to_string());
        item.labels = vec!["bug".to_string()];
        item
    }

    #[test]
    fn test_footer_carries_attribution() {
        let payload = mirror_payload("github", &github_issue(), Side::A);
        assert_eq!(payload.title, "Crash on start");
        assert!(payload
            .body
            .starts_with("**Originally from github issue #12**\n\nSteps to reproduce..."));
        assert!(payload.body.contains("Author: octocat"));
        assert!(payload.body.contains("Created: 2024-05-01T10:00:00+00:00"));
        assert!(payload.body.contains("Source: https://github.com/o/r/issues/12"));
        assert_eq!(payload.labels, vec!["bug".to_string()]);
        assert_eq!(payload.source.id, "12");
    }

    #[test]
    fn test_radicle_issue_to_github_gets_label() {
        let mut item = RemoteItem::new("4b7ad1f", "Flux capacitor");
        item.author = "alice".to_string();
        let payload = mirror_payload("radicle", &item, Side::B);
        assert!(payload.body.contains(EMPTY_BODY));
        assert!(payload.body.starts_with("**Originally from radicle issue 4b7ad1f**"));
        assert!(!payload.body.contains("Created:"));
        assert_eq!(payload.labels, vec![FROM_RADICLE_LABEL.to_string()]);
    }

    #[test]
    fn test_radicle_issue_carries_body_time_and_link() {
        use crate::platform::radicle::{parse_issue_show, parse_issue_table, permalink};

        let row = "│ ●   4b7ad1f   Flux capacitor   alice   (you)   2 days ago │\n";
        let mut item = parse_issue_table(row, chrono::Utc::now()).remove(0);
        let details = parse_issue_show(
            "│ Title   Flux capacitor │\n│ Issue   4b7ad1f8e2c3 │\n│ │\n│ It stopped fluxing. │\n",
        );
        item.body = details.body;
        item.url = Some(permalink("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5", "4b7ad1f8e2c3"));

        let payload = mirror_payload("radicle", &item, Side::B);
        assert!(payload.body.contains("\n\nIt stopped fluxing.\n\n---"));
        assert!(payload.body.contains("Author: alice"));
        assert!(payload.body.contains("Created: "));
        assert!(payload
            .body
            .contains("Source: rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5/issues/4b7ad1f8e2c3"));
    }

    #[test]
    fn test_label_not_duplicated() {
        let mut item = RemoteItem::new("4b7ad1f", "t");
        item.labels = vec![FROM_RADICLE_LABEL.to_string()];
        let payload = mirror_payload("radicle", &item, Side::B);
        assert_eq!(payload.labels.len(), 1);
    }
}
