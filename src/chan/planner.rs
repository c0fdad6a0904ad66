//! Attachment planning
//!
//! Turns decoded thread metadata into:
//! 1. The destination folder name, derived from the opening post
//! 2. The ordered list of attachments not yet present on disk

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::chan::config_loader::Endpoints;
use crate::chan::locator::{AttachmentLocator, Board};
use crate::chan::thread_fetcher::{Post, ThreadMetadata};

/// Longest folder name, in characters, before truncation
pub const MAX_FOLDER_NAME_CHARS: usize = 50;

/// Appended to truncated folder names
pub const TRUNCATION_MARKER: &str = "…";

/// Used when neither subject nor comment leaves anything after sanitizing
pub const UNNAMED_THREAD: &str = "Unnamed thread";

lazy_static! {
    static ref LINE_BREAK_PATTERN: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref TAG_PATTERN: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref NUMERIC_ENTITY_PATTERN: Regex = Regex::new(r"&#([xX][0-9a-fA-F]{1,6}|[0-9]{1,7});").unwrap();
    static ref WHITESPACE_PATTERN: Regex = Regex::new(r"\s+").unwrap();
    static ref EXTENSION_PATTERN: Regex = Regex::new(r"^\.[A-Za-z0-9]{1,8}$").unwrap();
}

fn is_path_hostile(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '<' | '>' | '|' | '"') || (c.is_control() && !c.is_whitespace())
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY_PATTERN.replace_all(text, |caps: &Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32).map(String::from).unwrap_or_default()
    });

    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Turn a post subject or comment into something safe to use as a folder name.
///
/// Markup is removed (`<br>` counts as a space), entities are decoded,
/// path-hostile characters are dropped, whitespace is collapsed and the
/// result is cut to [`MAX_FOLDER_NAME_CHARS`] plus [`TRUNCATION_MARKER`].
/// Trailing dots are trimmed since some filesystems refuse them. May return
/// an empty string.
pub fn sanitize_folder_name(raw: &str) -> String {
    let text = LINE_BREAK_PATTERN.replace_all(raw, " ");
    let text = TAG_PATTERN.replace_all(&text, "");
    let text = decode_entities(&text);
    let text: String = text.chars().filter(|c| !is_path_hostile(*c)).collect();
    let text = WHITESPACE_PATTERN.replace_all(&text, " ");
    let text = text.trim();

    if text.chars().count() <= MAX_FOLDER_NAME_CHARS {
        return text.trim_end_matches(['.', ' ']).to_string();
    }

    let head: String = text.chars().take(MAX_FOLDER_NAME_CHARS).collect();
    let head = head.trim_end_matches(['.', ' ']);
    if head.is_empty() {
        return String::new();
    }
    format!("{}{}", head, TRUNCATION_MARKER)
}

/// `attachments/{board}/{thread_id} - {name}` for one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationFolder {
    board: Board,
    dir_name: String,
}

impl DestinationFolder {
    /// Folder named after a sanitized thread title
    pub fn new(board: Board, thread_id: u64, name: &str) -> Self {
        Self {
            dir_name: format!("{} - {}", thread_id, name),
            board,
        }
    }

    /// Folder that already exists on disk under `dir_name`
    pub fn existing(board: Board, dir_name: impl Into<String>) -> Self {
        Self {
            board,
            dir_name: dir_name.into(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Location under the attachments root
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(self.board.as_str()).join(&self.dir_name)
    }
}

impl fmt::Display for DestinationFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.board, self.dir_name)
    }
}

/// Result of planning one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPlan {
    pub folder: DestinationFolder,
    /// Posts carrying an attachment, downloaded or not
    pub total_found: usize,
    /// Attachments still to fetch, in post order
    pub attachments: Vec<AttachmentLocator>,
}

/// Plans attachment downloads against a set of already present files
#[derive(Debug, Clone)]
pub struct AttachmentPlanner {
    endpoints: Endpoints,
}

impl AttachmentPlanner {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    /// Derive the destination folder from the opening post
    pub fn destination_folder(metadata: &ThreadMetadata, board: &Board) -> DestinationFolder {
        let op = metadata.op();
        let name = op
            .subject
            .as_deref()
            .map(sanitize_folder_name)
            .filter(|name| !name.is_empty())
            .or_else(|| Some(sanitize_folder_name(&op.body)).filter(|name| !name.is_empty()))
            .unwrap_or_else(|| UNNAMED_THREAD.to_string());

        DestinationFolder::new(board.clone(), op.id, &name)
    }

    /// Plan the attachments of `metadata` missing from `existing_files`, to be saved in `folder`
    pub fn plan(
        &self,
        metadata: &ThreadMetadata,
        folder: DestinationFolder,
        existing_files: &HashSet<String>,
    ) -> AttachmentPlan {
        let mut total_found = 0;
        let mut seen = HashSet::new();
        let mut attachments = Vec::new();

        for post in metadata.posts() {
            let (token, ext) = match (post.attachment_token, post.attachment_ext.as_deref()) {
                (Some(token), Some(ext)) => (token, ext),
                _ => continue,
            };
            total_found += 1;

            if !EXTENSION_PATTERN.is_match(ext) {
                warn!(post_id = post.id, "Skipping attachment with unusable extension {:?}", ext);
                continue;
            }

            let filename = format!("{}{}", token, ext);
            if existing_files.contains(&filename) {
                debug!(file = %filename, "Already downloaded");
                continue;
            }
            if !seen.insert(filename.clone()) {
                continue;
            }

            match AttachmentLocator::for_file(&self.endpoints, folder.board(), &filename) {
                Ok(locator) => attachments.push(locator.with_display_name(display_name(post, &filename))),
                Err(e) => warn!(post_id = post.id, "Skipping attachment: {}", e),
            }
        }

        AttachmentPlan {
            folder,
            total_found,
            attachments,
        }
    }
}

fn display_name(post: &Post, filename: &str) -> String {
    match (post.attachment_name.as_deref(), post.attachment_ext.as_deref()) {
        (Some(name), Some(ext)) if !name.trim().is_empty() => format!("{}{}", name, ext),
        _ => filename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(name: &str) -> Board {
        Board::parse(name).unwrap()
    }

    fn post(id: u64) -> Post {
        Post {
            id,
            body: String::new(),
            subject: None,
            attachment_token: None,
            attachment_ext: None,
            attachment_name: None,
        }
    }

    fn with_file(id: u64, token: u64, ext: &str) -> Post {
        Post {
            attachment_token: Some(token),
            attachment_ext: Some(ext.to_string()),
            ..post(id)
        }
    }

    fn thread(posts: Vec<Post>) -> ThreadMetadata {
        ThreadMetadata::new(posts).unwrap()
    }

    fn sample_posts() -> Vec<Post> {
        vec![
            Post {
                subject: Some("Test/Thread".to_string()),
                body: "hello".to_string(),
                ..post(123)
            },
            with_file(124, 169, ".png"),
        ]
    }

    fn plan(metadata: &ThreadMetadata, board_name: &str, existing: &HashSet<String>) -> AttachmentPlan {
        let folder = AttachmentPlanner::destination_folder(metadata, &board(board_name));
        AttachmentPlanner::new(Endpoints::default()).plan(metadata, folder, existing)
    }

    fn folder_of(posts: Vec<Post>) -> String {
        AttachmentPlanner::destination_folder(&thread(posts), &board("g")).to_string()
    }

    #[test]
    fn test_sample_thread_plan() {
        let plan = plan(&thread(sample_posts()), "g", &HashSet::new());

        assert_eq!(plan.folder.to_string(), "g/123 - TestThread");
        assert_eq!(plan.folder.path(Path::new("attachments")), PathBuf::from("attachments/g/123 - TestThread"));
        assert_eq!(plan.total_found, 1);
        assert_eq!(plan.attachments.len(), 1);
        assert_eq!(plan.attachments[0].url(), "https://i.4cdn.org/g/169.png");
        assert_eq!(plan.attachments[0].filename(), "169.png");
    }

    #[test]
    fn test_plan_is_idempotent_against_its_own_output() {
        let mut posts = sample_posts();
        posts.push(with_file(125, 170, ".webm"));
        posts.push(post(126));
        posts.push(with_file(127, 171, ".jpg"));
        let thread = thread(posts);

        let first = plan(&thread, "g", &HashSet::new());
        let names: Vec<&str> = first.attachments.iter().map(|a| a.filename()).collect();
        assert_eq!(names, vec!["169.png", "170.webm", "171.jpg"]);

        let existing: HashSet<String> = names.iter().map(|n| n.to_string()).collect();
        let second = plan(&thread, "g", &existing);
        assert!(second.attachments.is_empty());
        assert_eq!(second.total_found, 3);
        assert_eq!(second.folder, first.folder);
    }

    #[test]
    fn test_partial_existing_set_keeps_order() {
        let thread = thread(vec![
            with_file(10000001, 1, ".jpg"),
            with_file(10000002, 2, ".jpg"),
            with_file(10000003, 3, ".jpg"),
        ]);
        let existing: HashSet<String> = ["2.jpg".to_string()].into_iter().collect();

        let plan = plan(&thread, "a", &existing);
        let names: Vec<&str> = plan.attachments.iter().map(|a| a.filename()).collect();
        assert_eq!(names, vec!["1.jpg", "3.jpg"]);
    }

    #[test]
    fn test_attachment_requires_token_and_extension() {
        let thread = thread(vec![
            post(10000001),
            Post { attachment_token: Some(5), ..post(10000002) },
            Post { attachment_ext: Some(".png".to_string()), ..post(10000003) },
            with_file(10000004, 6, "../../etc"),
            with_file(10000005, 7, ".gif"),
        ]);

        let plan = plan(&thread, "b", &HashSet::new());
        let names: Vec<&str> = plan.attachments.iter().map(|a| a.filename()).collect();
        assert_eq!(names, vec!["7.gif"]);
        assert_eq!(plan.total_found, 2);
    }

    #[test]
    fn test_display_name_prefers_upload_name() {
        let thread = thread(vec![Post {
            attachment_name: Some("my cat".to_string()),
            ..with_file(10000001, 42, ".jpg")
        }]);

        let plan = plan(&thread, "an", &HashSet::new());
        assert_eq!(plan.attachments[0].display_name(), "my cat.jpg");
        assert_eq!(plan.attachments[0].filename(), "42.jpg");
    }

    #[test]
    fn test_folder_name_fallbacks() {
        let mut op = Post {
            subject: Some("<b></b>".to_string()),
            body: "Comment <br>fallback".to_string(),
            ..post(10000001)
        };
        assert_eq!(folder_of(vec![op.clone()]), "g/10000001 - Comment fallback");

        op.body = "???".to_string();
        assert_eq!(folder_of(vec![op.clone()]), "g/10000001 - Unnamed thread");

        op.subject = None;
        op.body = String::new();
        assert_eq!(folder_of(vec![op.clone()]), "g/10000001 - Unnamed thread");

        op.subject = Some(".".repeat(60));
        assert_eq!(folder_of(vec![op]), "g/10000001 - Unnamed thread");
    }

    #[test]
    fn test_sanitize_strips_markup_and_hostile_characters() {
        assert_eq!(sanitize_folder_name("Test/Thread"), "TestThread");
        assert_eq!(
            sanitize_folder_name("<span class=\"quote\">&gt;be me</span><br>on a <b>boat</b>"),
            "be me on a boat"
        );
        assert_eq!(sanitize_folder_name("Tom &amp; Jerry&#039;s   show"), "Tom & Jerry's show");
        assert_eq!(sanitize_folder_name(r#"a\b:c*d?e"f<g>h|i"#), "abcdefghi");
        assert_eq!(sanitize_folder_name("  spaced \t\n out  "), "spaced out");
        assert_eq!(sanitize_folder_name("ends with dots..."), "ends with dots");
        assert_eq!(sanitize_folder_name(""), "");
        assert_eq!(sanitize_folder_name("&lt;&gt;"), "");
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "a".repeat(80);
        let name = sanitize_folder_name(&long);
        assert_eq!(name, format!("{}{}", "a".repeat(MAX_FOLDER_NAME_CHARS), TRUNCATION_MARKER));

        let exact = "b".repeat(MAX_FOLDER_NAME_CHARS);
        assert_eq!(sanitize_folder_name(&exact), exact);

        // nothing left before the cut means no name at all
        assert_eq!(sanitize_folder_name(&".".repeat(60)), "");
        assert_eq!(sanitize_folder_name(&". ".repeat(40)), "");
        assert_eq!(sanitize_folder_name(&format!("{}x", ".".repeat(55))), "");
    }

    #[test]
    fn test_sanitize_is_total_and_bounded() {
        let inputs = [
            String::new(),
            "plain".to_string(),
            "<a href=\"/g/\">link</a> / \\ : * ? < > |".to_string(),
            "ü".repeat(200),
            "word ".repeat(40),
            "&#x2F;&#47;slashes&#0;".to_string(),
            "\u{0}\u{7}control".to_string(),
        ];

        for input in &inputs {
            let name = sanitize_folder_name(input);
            assert!(
                !name.chars().any(is_path_hostile),
                "hostile character left in {:?}",
                name
            );
            assert!(
                name.chars().count() <= MAX_FOLDER_NAME_CHARS + TRUNCATION_MARKER.chars().count(),
                "{:?} is too long",
                name
            );
            assert_eq!(name, sanitize_folder_name(input));
        }
    }
}
