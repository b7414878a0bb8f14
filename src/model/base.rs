//! Identity and audit attributes shared by every entity.

use crate::dsl::ResourceDesigner;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identity and audit fields. Embed with `#[serde(flatten)]`; the framework fills them in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Base {
    #[serde(default)]
    pub id: String,
    /// Owning tenant, fixed at creation.
    #[serde(default)]
    pub tenant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_by: String,
    /// Soft-deletion marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Base {
    /// Assign an id (when absent), the owning tenant and creation audit fields.
    pub fn stamp_created(&mut self, tenant: &str, subject: &str, now: DateTime<Utc>) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.tenant = tenant.to_string();
        self.created_at = Some(now);
        self.updated_at = Some(now);
        self.created_by = subject.to_string();
        self.updated_by = subject.to_string();
        self.deleted_at = None;
    }

    /// Refresh modification audit fields, keeping the creation ones from `existing`.
    pub fn stamp_updated(&mut self, existing: &Base, subject: &str, now: DateTime<Utc>) {
        self.id = existing.id.clone();
        self.tenant = existing.tenant.clone();
        self.created_at = existing.created_at;
        self.created_by = existing.created_by.clone();
        self.updated_at = Some(now);
        self.updated_by = subject.to_string();
        self.deleted_at = existing.deleted_at;
    }
}

/// An entity type that can be registered as a resource.
///
/// `design` is the declarative description of the resource; the default leaves every verb disabled.
pub trait Model: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    fn base(&self) -> &Base;

    fn base_mut(&mut self) -> &mut Base;

    fn design(_d: &mut ResourceDesigner) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        base: Base,
        text: String,
    }

    #[test]
    fn flattened_base_serializes_next_to_fields() {
        let mut note = Note {
            text: "hi".into(),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        note.base.stamp_created("t1", "alice", now);
        let v = serde_json::to_value(&note).unwrap();
        assert_eq!(v["text"], "hi");
        assert!(!v["id"].as_str().unwrap().is_empty());
        assert_eq!(v["created_by"], "alice");
        assert_eq!(v["tenant"], "t1");
        assert!(v.get("deleted_at").is_none());

        let back: Note = serde_json::from_value(v).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn stamp_updated_keeps_creation_fields() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut existing = Base::default();
        existing.stamp_created("t1", "alice", t0);

        let mut incoming = Base {
            id: "ignored".into(),
            tenant: "t2".into(),
            created_by: "mallory".into(),
            ..Default::default()
        };
        incoming.stamp_updated(&existing, "bob", t1);
        assert_eq!(incoming.id, existing.id);
        assert_eq!(incoming.tenant, "t1");
        assert_eq!(incoming.created_by, "alice");
        assert_eq!(incoming.created_at, Some(t0));
        assert_eq!(incoming.updated_by, "bob");
        assert_eq!(incoming.updated_at, Some(t1));
    }

    #[test]
    fn client_supplied_id_survives_creation() {
        let mut b = Base {
            id: "fixed".into(),
            ..Default::default()
        };
        b.stamp_created("", "", Utc::now());
        assert_eq!(b.id, "fixed");
    }
}
