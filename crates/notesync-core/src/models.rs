//! Data models for NoteSync
//!
//! Defines the note [`Entry`], its synchronised [`EntryContent`] and the
//! last-synced [`Snapshot`] used as merge base by the conflict resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default color for new entries
pub const DEFAULT_COLOR: &str = "#FFFFFF";

/// A user note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    /// Local identifier
    pub id: Uuid,
    /// Note title
    pub title: String,
    /// Note body
    pub description: String,
    /// Display color as `#RRGGBB`
    pub color: String,
    /// When this entry was created
    pub created_at: DateTime<Utc>,
    /// When the content was last edited
    pub edited_at: DateTime<Utc>,
    /// When the entry was last opened
    pub viewed_at: DateTime<Utc>,
    /// Manual ordering key
    pub position: i64,
    /// Identifier assigned by the remote on first push
    pub sync_id: Option<String>,
    /// Local change not yet acknowledged by the remote
    pub pending: bool,
    /// Soft-delete marker, set until the remote acknowledges the delete
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Current time truncated to the millisecond precision stored in SQLite
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

impl Entry {
    /// Create a new entry with the given title
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            color: DEFAULT_COLOR.to_string(),
            created_at: now,
            edited_at: now,
            viewed_at: now,
            position: 0,
            sync_id: None,
            pending: true,
            deleted_at: None,
        }
    }

    /// Create an entry from content pulled from the remote
    pub fn from_remote(
        sync_id: impl Into<String>,
        content: &EntryContent,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: content.title.clone(),
            description: content.description.clone(),
            color: content.color.clone(),
            created_at,
            edited_at: content.edited_at,
            viewed_at: content.edited_at,
            position: 0,
            sync_id: Some(sync_id.into()),
            pending: false,
            deleted_at: None,
        }
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Update the description
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    /// Update the color (no validation, see `Store::set_color`)
    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
        self.touch();
    }

    /// The synchronised part of this entry
    pub fn content(&self) -> EntryContent {
        EntryContent {
            title: self.title.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            edited_at: self.edited_at,
        }
    }

    /// Overwrite the synchronised fields
    pub fn apply_content(&mut self, content: &EntryContent) {
        self.title = content.title.clone();
        self.description = content.description.clone();
        self.color = content.color.clone();
        self.edited_at = content.edited_at;
    }

    /// Whether the entry is a pending delete
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the entry has reached the remote at least once
    pub fn is_synced_once(&self) -> bool {
        self.sync_id.is_some()
    }

    fn touch(&mut self) {
        self.edited_at = now_millis();
        self.pending = true;
    }
}

/// Fields of an entry that are exchanged with the remote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryContent {
    pub title: String,
    pub description: String,
    pub color: String,
    pub edited_at: DateTime<Utc>,
}

/// A synchronised field, used to report conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    Title,
    Description,
    Color,
}

impl ContentField {
    pub const ALL: [ContentField; 3] = [
        ContentField::Title,
        ContentField::Description,
        ContentField::Color,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentField::Title => "title",
            ContentField::Description => "description",
            ContentField::Color => "color",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl std::fmt::Display for ContentField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntryContent {
    /// Value of a single field
    pub fn field(&self, field: ContentField) -> &str {
        match field {
            ContentField::Title => &self.title,
            ContentField::Description => &self.description,
            ContentField::Color => &self.color,
        }
    }

    /// Replace a single field with the value from `other`
    pub fn take_field(&mut self, field: ContentField, other: &EntryContent) {
        match field {
            ContentField::Title => self.title = other.title.clone(),
            ContentField::Description => self.description = other.description.clone(),
            ContentField::Color => self.color = other.color.clone(),
        }
    }

    /// Compare synchronised fields, ignoring the edit timestamp
    pub fn same_fields(&self, other: &EntryContent) -> bool {
        ContentField::ALL
            .iter()
            .all(|f| self.field(*f) == other.field(*f))
    }

    /// Fields whose values differ between the two versions
    pub fn differing_fields(&self, other: &EntryContent) -> Vec<ContentField> {
        ContentField::ALL
            .into_iter()
            .filter(|f| self.field(*f) != other.field(*f))
            .collect()
    }
}

/// Content of an entry as of the last successful sync
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub entry_id: Uuid,
    pub sync_id: String,
    pub content: EntryContent,
    pub synced_at: DateTime<Utc>,
}

/// An unresolved conflict between the local entry and its remote version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entry_id: Uuid,
    pub sync_id: String,
    /// Remote version at the time the conflict was detected
    pub remote: EntryContent,
    /// Fields both sides changed to different values
    pub fields: Vec<ContentField>,
    pub detected_at: DateTime<Utc>,
}

/// Check a `#RRGGBB` color string
pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_new() {
        let entry = Entry::new("Groceries");
        assert_eq!(entry.title, "Groceries");
        assert!(entry.description.is_empty());
        assert_eq!(entry.color, DEFAULT_COLOR);
        assert!(entry.pending);
        assert!(entry.sync_id.is_none());
        assert!(!entry.is_deleted());
    }

    #[test]
    fn test_set_title_marks_pending() {
        let mut entry = Entry::new("Old");
        entry.pending = false;
        let original = entry.edited_at;
        std::thread::sleep(std::time::Duration::from_millis(5));

        entry.set_title("New");
        assert_eq!(entry.title, "New");
        assert!(entry.pending);
        assert!(entry.edited_at > original);
    }

    #[test]
    fn test_differing_fields() {
        let a = Entry::new("Same").content();
        let mut b = a.clone();
        b.color = "#FF0000".to_string();
        b.edited_at = Utc::now();

        assert_eq!(a.differing_fields(&b), vec![ContentField::Color]);
        assert!(!a.same_fields(&b));
        b.color = a.color.clone();
        assert!(a.same_fields(&b));
    }

    #[test]
    fn test_from_remote_is_not_pending() {
        let content = Entry::new("Remote").content();
        let entry = Entry::from_remote("17", &content, Utc::now());
        assert_eq!(entry.sync_id.as_deref(), Some("17"));
        assert!(!entry.pending);
        assert_eq!(entry.content(), content);
    }

    #[test]
    fn test_content_field_parse() {
        assert_eq!(ContentField::parse("color"), Some(ContentField::Color));
        assert_eq!(ContentField::parse("colour"), None);
        assert_eq!(ContentField::Title.to_string(), "title");
    }

    #[test]
    fn test_color_validation() {
        assert!(is_valid_color("#A1b2C3"));
        assert!(!is_valid_color("A1B2C3"));
        assert!(!is_valid_color("#A1B2C"));
        assert!(!is_valid_color("#GGGGGG"));
    }

    #[test]
    fn test_entry_serialization() {
        let mut entry = Entry::new("Serialize me");
        entry.set_description("body");
        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
