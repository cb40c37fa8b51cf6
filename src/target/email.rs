//! Email target.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Target, TargetKind};
use crate::error::ModelError;
use crate::model::{DisplayFields, Scripts, TargetTypeId, Templates};

pub const EMAIL_TARGET: TargetTypeId = TargetTypeId(1);

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-+]+@[A-Za-z0-9_.\-]+\.[a-zA-Z]+$").unwrap())
}

/// The email target kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Email;

impl TargetKind for Email {
    fn id(&self) -> TargetTypeId {
        EMAIL_TARGET
    }

    fn name(&self) -> &'static str {
        "Email"
    }

    fn load(&self, raw: &str) -> Result<Box<dyn Target>, ModelError> {
        Ok(Box::new(EmailTarget::decode(raw)?))
    }

    fn blank(&self) -> Box<dyn Target> {
        Box::new(EmailTarget::default())
    }

    fn templates(&self) -> Templates {
        Templates::from([("edit", "email-edit.html"), ("view", "email-view.html")])
    }

    fn scripts(&self) -> Scripts {
        Scripts::from([("edit", vec!["email.js"])])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EmailAddress {
    pub to: String,
    pub reply_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EmailTarget {
    pub addresses: Vec<EmailAddress>,
}

impl EmailTarget {
    pub fn decode(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Target for EmailTarget {
    fn kind(&self) -> TargetTypeId {
        EMAIL_TARGET
    }

    fn validate(&self) -> Vec<String> {
        let re = email_regex();
        let mut errs = Vec::new();

        if self.addresses.is_empty() {
            errs.push("At least one email address is required.".to_string());
        }
        if self.addresses.iter().any(|a| !re.is_match(&a.to)) {
            errs.push("An invalid email to was provided.".to_string());
        }
        if self
            .addresses
            .iter()
            .any(|a| !a.reply_to.is_empty() && !re.is_match(&a.reply_to))
        {
            errs.push("An invalid reply to was provided.".to_string());
        }
        errs
    }

    fn encode(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(ModelError::Encode)
    }

    fn to_display_fields(&self) -> DisplayFields {
        DisplayFields::from([
            (
                "To".to_string(),
                join_present(self.addresses.iter().map(|a| a.to.as_str())),
            ),
            (
                "ReplyTo".to_string(),
                join_present(self.addresses.iter().map(|a| a.reply_to.as_str())),
            ),
        ])
    }

    fn recipients(&self) -> String {
        self.addresses
            .iter()
            .map(|a| a.to.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn join_present<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.filter(|s| !s.is_empty()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(pairs: &[(&str, &str)]) -> EmailTarget {
        EmailTarget {
            addresses: pairs
                .iter()
                .map(|(to, reply_to)| EmailAddress {
                    to: to.to_string(),
                    reply_to: reply_to.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_addresses() {
        assert!(target(&[("a@b.com", "")]).validate().is_empty());
        assert!(target(&[("ops+pager@corp.example.io", "noc@corp.example.io")])
            .validate()
            .is_empty());
    }

    #[test]
    fn test_invalid_to() {
        assert_eq!(
            target(&[("not-an-email", "")]).validate(),
            vec!["An invalid email to was provided."]
        );
    }

    #[test]
    fn test_non_ascii_addresses_rejected() {
        assert_eq!(
            target(&[("ü@b.com", "")]).validate(),
            vec!["An invalid email to was provided."]
        );
        assert_eq!(
            target(&[("ops@b.com", "rené@b.com")]).validate(),
            vec!["An invalid reply to was provided."]
        );
        assert!(target(&[("first_last+tag@mail-1.example.com", "")])
            .validate()
            .is_empty());
    }

    #[test]
    fn test_invalid_addresses_aggregate() {
        let errs = target(&[("bad", ""), ("worse", ""), ("a@b.com", "")]).validate();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_invalid_reply_to_with_valid_to() {
        assert_eq!(
            target(&[("a@b.com", "nope")]).validate(),
            vec!["An invalid reply to was provided."]
        );
    }

    #[test]
    fn test_no_addresses() {
        assert_eq!(EmailTarget::default().validate().len(), 1);
    }

    #[test]
    fn test_load_and_encode() {
        let raw = r#"{"Addresses":[{"To":"a@b.com","ReplyTo":"c@d.com"}]}"#;
        let loaded = Email.load(raw).unwrap();
        assert_eq!(loaded.kind(), EMAIL_TARGET);
        assert_eq!(loaded.encode().unwrap(), raw);
        assert_eq!(loaded.to_display_fields()["ReplyTo"], "c@d.com");
        assert_eq!(loaded.recipients(), "a@b.com");

        let blank = Email.load("{}").unwrap();
        assert_eq!(blank.to_display_fields()["To"], "");
        assert!(matches!(Email.load("[1,2"), Err(ModelError::Decode(_))));
    }
}
