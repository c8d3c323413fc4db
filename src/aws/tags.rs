//! Resource tag constants for vpclab
//!
//! Every resource the lab creates is tagged with these standard tags. The
//! project tag is the only durable key: there is no local state file, and a
//! topology is rediscovered purely by querying for these tags.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `vpclab:project`    | Project identifier shared by the whole topology |
//! | `vpclab:role`       | Instance role (bastion/web/app), where applicable |
//! | `vpclab:created-at` | RFC 3339 creation timestamp |
//! | `Name`              | Human-readable name, `{project}-...` |

use crate::topology::Role;
use anyhow::Result;

/// Tag key for the project identifier - all vpclab resources have this
pub const TAG_PROJECT: &str = "vpclab:project";

/// Tag key for the instance role (bastion/web/app)
pub const TAG_ROLE: &str = "vpclab:role";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "vpclab:created-at";

/// Tag key for the human-readable resource name
pub const TAG_NAME: &str = "Name";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Build an EC2 TagSpecification with standard vpclab tags plus a Name tag.
pub fn ec2_tag_spec(
    resource_type: aws_sdk_ec2::types::ResourceType,
    project: &str,
    name: &str,
    role: Option<Role>,
) -> aws_sdk_ec2::types::TagSpecification {
    use aws_sdk_ec2::types::{Tag, TagSpecification};

    let created_at = format_created_at(chrono::Utc::now());
    let mut builder = TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key(TAG_PROJECT).value(project).build())
        .tags(
            Tag::builder()
                .key(TAG_CREATED_AT)
                .value(&created_at)
                .build(),
        )
        .tags(Tag::builder().key(TAG_NAME).value(name).build());
    if let Some(role) = role {
        builder = builder.tags(Tag::builder().key(TAG_ROLE).value(role.as_str()).build());
    }
    builder.build()
}

/// Build the standard vpclab tag set for IAM resources.
///
/// IAM tag builders are fallible because key and value are required fields.
pub fn iam_tags(project: &str, role: Role) -> Result<Vec<aws_sdk_iam::types::Tag>> {
    use aws_sdk_iam::types::Tag;

    let created_at = format_created_at(chrono::Utc::now());
    let tags = vec![
        Tag::builder()
            .key(TAG_PROJECT)
            .value(project)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {e}"))?,
        Tag::builder()
            .key(TAG_ROLE)
            .value(role.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {e}"))?,
        Tag::builder()
            .key(TAG_CREATED_AT)
            .value(&created_at)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {e}"))?,
    ];
    Ok(tags)
}

/// Extract EC2 tags into a key/value map.
pub fn tag_map(tags: &[aws_sdk_ec2::types::Tag]) -> std::collections::HashMap<String, String> {
    tags.iter()
        .filter_map(|t| match (t.key(), t.value()) {
            (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
            _ => None,
        })
        .collect()
}

/// Read the Name tag from an EC2 tag list, if present.
pub fn name_of(tags: &[aws_sdk_ec2::types::Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.key() == Some(TAG_NAME))
        .and_then(|t| t.value())
        .map(|v| v.to_string())
}

/// Read the role tag from an EC2 tag list, if present.
pub fn role_of(tags: &[aws_sdk_ec2::types::Tag]) -> Option<Role> {
    tags.iter()
        .find(|t| t.key() == Some(TAG_ROLE))
        .and_then(|t| t.value())
        .and_then(Role::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::Tag;

    #[test]
    fn created_at_round_trips() {
        let now = chrono::Utc::now();
        let parsed = parse_created_at(&format_created_at(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
        assert!(parse_created_at("not a timestamp").is_none());
    }

    #[test]
    fn role_read_from_tags() {
        let tags = vec![
            Tag::builder().key(TAG_PROJECT).value("lab").build(),
            Tag::builder().key(TAG_ROLE).value("web").build(),
        ];
        assert_eq!(role_of(&tags), Some(Role::Web));
        assert_eq!(name_of(&tags), None);
    }
}
