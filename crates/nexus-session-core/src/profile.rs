use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{Document, Identity};
use crate::router::AppRoute;

pub const ROLE_FIELD: &str = "role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
        }
    }

    /// Normalizes the spellings found in stored profile documents.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "super_admin" | "superadmin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub fn home_route(self) -> AppRoute {
        match self {
            Self::SuperAdmin => AppRoute::SuperAdminHome,
            Self::Admin => AppRoute::AdminHome,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile_role_missing")]
    MissingRole,
    #[error("profile_role_unknown:{raw}")]
    UnknownRole { raw: String },
}

/// Extended attributes stored alongside the role in the profile document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl Profile {
    fn from_document(document: &Document) -> Self {
        Self {
            name: string_field(document, "name"),
            phone: string_field(document, "phone"),
            address: string_field(document, "address"),
            profile_picture: string_field(document, "profilePicture"),
        }
    }
}

/// An authenticated identity together with its authorization role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub profile: Profile,
}

impl Principal {
    /// Builds a principal from the identity and its profile document.
    ///
    /// `default_role` applies only when the document carries no role at all;
    /// an unrecognized role string is always rejected.
    pub fn from_profile_document(
        identity: &Identity,
        document: &Document,
        default_role: Option<Role>,
    ) -> Result<Self, ProfileError> {
        let role = match document.get(ROLE_FIELD) {
            None | Some(Value::Null) => default_role.ok_or(ProfileError::MissingRole)?,
            Some(Value::String(raw)) if raw.trim().is_empty() => {
                default_role.ok_or(ProfileError::MissingRole)?
            }
            Some(Value::String(raw)) => {
                Role::parse(raw).ok_or_else(|| ProfileError::UnknownRole { raw: raw.clone() })?
            }
            Some(other) => {
                return Err(ProfileError::UnknownRole {
                    raw: other.to_string(),
                });
            }
        };

        Ok(Self {
            uid: identity.uid.clone(),
            email: identity
                .email
                .clone()
                .or_else(|| string_field(document, "email")),
            role,
            profile: Profile::from_document(document),
        })
    }
}

/// Largest accepted profile picture upload.
pub const MAX_PICTURE_BYTES: u64 = 1 << 20;
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureUpload {
    /// Encoded image as stored in the profile document.
    pub data_url: String,
    /// Size of the original file.
    pub size_bytes: u64,
}

/// Editable profile fields. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub picture: Option<PictureUpload>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn picture_too_large(&self) -> bool {
        self.picture
            .as_ref()
            .is_some_and(|picture| picture.size_bytes > MAX_PICTURE_BYTES)
    }

    /// Fields to merge into the profile document. The role is never written.
    pub fn to_document(&self, updated_at: DateTime<Utc>) -> Document {
        let mut fields = Document::new();
        if let Some(name) = self.name.as_ref() {
            fields.insert("name".to_string(), Value::String(name.trim().to_string()));
        }
        if let Some(phone) = self.phone.as_ref() {
            fields.insert("phone".to_string(), Value::String(phone.trim().to_string()));
        }
        if let Some(address) = self.address.as_ref() {
            fields.insert(
                "address".to_string(),
                Value::String(address.trim().to_string()),
            );
        }
        if let Some(picture) = self.picture.as_ref() {
            fields.insert(
                "profilePicture".to_string(),
                Value::String(picture.data_url.clone()),
            );
        }
        fields.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(updated_at.to_rfc3339()),
        );
        fields
    }

    /// Applies the update to an in-memory profile the same way the merge
    /// applies it to the stored document.
    pub fn apply_to(&self, profile: &mut Profile) {
        let non_empty = |value: &String| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        if let Some(name) = self.name.as_ref() {
            profile.name = non_empty(name);
        }
        if let Some(phone) = self.phone.as_ref() {
            profile.phone = non_empty(phone);
        }
        if let Some(address) = self.address.as_ref() {
            profile.address = non_empty(address);
        }
        if let Some(picture) = self.picture.as_ref() {
            profile.profile_picture = non_empty(&picture.data_url);
        }
    }
}

fn string_field(document: &Document, key: &str) -> Option<String> {
    document
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn identity() -> Identity {
        Identity::new("42").with_email("ada@nexus.test")
    }

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[test]
    fn role_parse_accepts_known_spellings() {
        assert_eq!(Role::parse("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("super-admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse(" Super Admin "), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("guest"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn principal_reads_role_and_profile_fields() {
        let principal = Principal::from_profile_document(
            &identity(),
            &document(json!({
                "role": "admin",
                "name": "Ada",
                "phone": " ",
                "profilePicture": "data:image/png;base64,AAAA",
            })),
            None,
        )
        .expect("valid profile");

        assert_eq!(principal.uid, "42");
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.email.as_deref(), Some("ada@nexus.test"));
        assert_eq!(principal.profile.name.as_deref(), Some("Ada"));
        assert_eq!(principal.profile.phone, None);
        assert!(principal.profile.profile_picture.is_some());
    }

    #[test]
    fn missing_role_fails_closed_without_configured_default() {
        let error = Principal::from_profile_document(&identity(), &document(json!({})), None)
            .expect_err("role required");
        assert_eq!(error, ProfileError::MissingRole);

        let error =
            Principal::from_profile_document(&identity(), &document(json!({"role": null})), None)
                .expect_err("null role rejected");
        assert_eq!(error, ProfileError::MissingRole);
    }

    #[test]
    fn configured_default_role_applies_only_to_missing_role() {
        let principal =
            Principal::from_profile_document(&identity(), &document(json!({})), Some(Role::Admin))
                .expect("default applied");
        assert_eq!(principal.role, Role::Admin);

        let error = Principal::from_profile_document(
            &identity(),
            &document(json!({"role": "guest"})),
            Some(Role::Admin),
        )
        .expect_err("unknown role never defaulted");
        assert_eq!(
            error,
            ProfileError::UnknownRole {
                raw: "guest".to_string()
            }
        );
    }

    #[test]
    fn non_string_role_is_rejected() {
        let error =
            Principal::from_profile_document(&identity(), &document(json!({"role": 7})), None)
                .expect_err("numeric role rejected");
        assert_eq!(
            error,
            ProfileError::UnknownRole {
                raw: "7".to_string()
            }
        );
    }

    #[test]
    fn email_falls_back_to_document() {
        let principal = Principal::from_profile_document(
            &Identity::new("7"),
            &document(json!({"role": "super_admin", "email": "root@nexus.test"})),
            None,
        )
        .expect("valid profile");
        assert_eq!(principal.email.as_deref(), Some("root@nexus.test"));
        assert_eq!(principal.role.home_route(), AppRoute::SuperAdminHome);
    }

    #[test]
    fn profile_update_never_writes_role() {
        let update = ProfileUpdate {
            name: Some(" Ada Lovelace ".to_string()),
            phone: None,
            address: Some("1 Analytical Way".to_string()),
            picture: None,
        };
        let updated_at = Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp");
        let fields = update.to_document(updated_at);

        assert_eq!(fields.get("name"), Some(&json!("Ada Lovelace")));
        assert_eq!(fields.get("address"), Some(&json!("1 Analytical Way")));
        assert!(!fields.contains_key("phone"));
        assert!(!fields.contains_key(ROLE_FIELD));
        assert_eq!(
            fields.get(UPDATED_AT_FIELD),
            Some(&json!(updated_at.to_rfc3339()))
        );

        let mut profile = Profile {
            phone: Some("555".to_string()),
            ..Profile::default()
        };
        update.apply_to(&mut profile);
        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.phone.as_deref(), Some("555"));
    }

    #[test]
    fn picture_limit_is_one_mebibyte() {
        let mut update = ProfileUpdate {
            picture: Some(PictureUpload {
                data_url: "data:image/png;base64,AAAA".to_string(),
                size_bytes: MAX_PICTURE_BYTES,
            }),
            ..ProfileUpdate::default()
        };
        assert!(!update.picture_too_large());
        if let Some(picture) = update.picture.as_mut() {
            picture.size_bytes += 1;
        }
        assert!(update.picture_too_large());
    }
}
