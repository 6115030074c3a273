use std::cmp;

use chrono::SecondsFormat;
use human_bytes::human_bytes;

use crate::tree::{RepositoryIndex, TreeNode};

const NAME: &str = "Name";
const SIZE: &str = "Size";
const TYPE: &str = "Type";
const MODIFIED: &str = "Modified";

/// Type column for a file: `app.bsky.feed.post` reads as `Post Record`.
pub fn record_type(collection: &str) -> String {
    let last = collection.rsplit('.').next().unwrap_or(collection);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => format!("{}{} Record", first.to_uppercase(), chars.as_str()),
        None => "Record".to_owned(),
    }
}

fn type_of(node: &TreeNode) -> String {
    match node {
        TreeNode::Folder { .. } => "File Folder".to_owned(),
        TreeNode::File { collection, .. } => record_type(collection),
    }
}

fn modified_of(node: &TreeNode) -> String {
    match node {
        TreeNode::File {
            created_at: Some(at),
            ..
        } => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        _ => String::new(),
    }
}

/// Folder outline with aggregate sizes. A `max_depth` of 0 shows every level.
pub fn render_tree(index: &RepositoryIndex, max_depth: usize) -> String {
    let mut lines = vec![];
    let mut stack: Vec<(usize, &TreeNode)> = index.root.iter().rev().map(|node| (0, node)).collect();

    while let Some((depth, node)) = stack.pop() {
        if !node.is_folder() {
            continue;
        }

        lines.push(format!(
            "{indent}{label}/ ({size})",
            indent = "  ".repeat(depth),
            label = node.label(),
            size = human_bytes(node.size() as f64),
        ));

        if max_depth == 0 || depth + 1 < max_depth {
            stack.extend(node.children().iter().rev().map(|child| (depth + 1, child)));
        }
    }

    lines.join("\n")
}

/// Columns Name, Size, Type and Modified for the entries at `path`.
pub fn render_listing<S: AsRef<str>>(index: &RepositoryIndex, path: &[S]) -> String {
    let rows: Vec<[String; 4]> = index
        .lookup(path)
        .into_iter()
        .map(|node| {
            [
                node.label().to_owned(),
                human_bytes(node.size() as f64),
                type_of(node),
                modified_of(node),
            ]
        })
        .collect();

    let widths = rows.iter().fold(
        [NAME.len(), SIZE.len(), TYPE.len()],
        |acc, [name, size, kind, _]| {
            [
                cmp::max(acc[0], name.chars().count()),
                cmp::max(acc[1], size.chars().count()),
                cmp::max(acc[2], kind.chars().count()),
            ]
        },
    );

    let header = [NAME, SIZE, TYPE, MODIFIED].map(str::to_owned);

    std::iter::once(&header)
        .chain(rows.iter())
        .map(|[name, size, kind, modified]| {
            format!(
                "{name:<w0$}  {size:>w1$}  {kind:<w2$}  {modified}",
                name = name,
                size = size,
                kind = kind,
                modified = modified,
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            )
            .trim_end()
            .to_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Status line: object count, total size and the repository DID.
pub fn render_summary(index: &RepositoryIndex) -> String {
    let objects = match index.record_count {
        1 => "1 object".to_owned(),
        n => format!("{} objects", n),
    };

    let mut summary = format!("{}, {}", objects, human_bytes(index.total_size as f64));
    if let Some(did) = &index.did {
        summary.push_str(&format!(" in {}", did));
    }
    if !index.warnings.is_empty() {
        summary.push_str(&format!(" ({} skipped)", index.warnings.len()));
    }
    summary
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{repo::DecodedRecord, tree::Projector};

    fn index() -> RepositoryIndex {
        let mut projector = Projector::new();
        for (collection, key, byte_size) in [
            ("app.bsky.feed.post", "a1", 100),
            ("app.bsky.feed.like", "b2", 50),
            ("app.bsky.actor.profile", "self", 30),
        ] {
            projector.insert(DecodedRecord {
                collection: collection.into(),
                key: key.into(),
                byte_size,
                created_at: (key == "a1").then(|| Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            });
        }
        projector.finish()
    }

    #[test]
    fn record_types() {
        assert_eq!(record_type("app.bsky.feed.post"), "Post Record");
        assert_eq!(record_type("app.bsky.graph.follow"), "Follow Record");
        assert_eq!(record_type("single"), "Single Record");
        assert_eq!(record_type(""), "Record");
    }

    #[test]
    fn tree_of_folders() {
        let tree = render_tree(&index(), 0);
        let lines: Vec<_> = tree.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], format!("app.bsky/ ({})", human_bytes(180_f64)));
        assert_eq!(lines[1], format!("  feed/ ({})", human_bytes(150_f64)));
        assert_eq!(lines[2], format!("    post/ ({})", human_bytes(100_f64)));
        assert!(lines[5].starts_with("    profile/"));
    }

    #[test]
    fn tree_depth_limit() {
        let tree = render_tree(&index(), 2);
        let labels: Vec<_> = tree.lines().map(str::trim).collect();
        assert_eq!(labels.len(), 3);
        assert!(labels[2].starts_with("actor/"));
    }

    #[test]
    fn listing_columns() {
        let listing = render_listing(&index(), &["app.bsky", "feed", "post"]);
        let lines: Vec<_> = listing.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Name"));
        assert!(lines[1].starts_with("a1"));
        assert!(lines[1].contains("Post Record"));
        assert!(lines[1].ends_with("2024-01-02T03:04:05Z"));
    }

    #[test]
    fn listing_folders() {
        let listing = render_listing::<&str>(&index(), &[]);
        let lines: Vec<_> = listing.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("File Folder"));
        assert!(lines[1].contains(&human_bytes(180_f64)));
    }

    #[test]
    fn listing_miss_is_header_only() {
        let listing = render_listing(&index(), &["nowhere"]);
        assert_eq!(listing.lines().count(), 1);
    }

    #[test]
    fn summary_line() {
        let mut index = index();
        assert_eq!(render_summary(&index), format!("3 objects, {}", human_bytes(180_f64)));

        index.did = Some("did:plc:abc".into());
        index.record_count = 1;
        assert!(render_summary(&index).starts_with("1 object,"));
        assert!(render_summary(&index).ends_with(" in did:plc:abc"));
    }
}
