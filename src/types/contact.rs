//! WeChat contact types.
//!
//! Users, groups and special accounts are all identified by an opaque
//! per-session user name. Group chats carry the `@@` prefix.

use serde::{Deserialize, Serialize};

/// Well-known user name prefixes and special accounts.
pub mod usernames {
    /// Prefix carried by every group chat user name.
    pub const GROUP_PREFIX: &str = "@@";
    /// The file transfer helper, a common target for bot notices.
    pub const FILE_HELPER: &str = "filehelper";
}

/// Returns true if the user name addresses a group chat.
pub fn is_group_user_name(user_name: &str) -> bool {
    user_name.starts_with(usernames::GROUP_PREFIX)
}

/// A contact record as returned by the server.
///
/// Groups use the same record; their members are carried in `member_list`
/// when the group roster has been fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contact {
    pub user_name: String,
    #[serde(default)]
    pub nick_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub remark_name: String,
    #[serde(default)]
    pub sex: i64,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub head_img_url: String,
    #[serde(default)]
    pub contact_flag: i64,
    #[serde(default)]
    pub verify_flag: i64,
    #[serde(default)]
    pub member_list: Vec<Contact>,
}

impl Contact {
    /// Creates a contact that only carries its user name.
    pub fn with_user_name(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Default::default()
        }
    }

    /// Returns true if this contact is a group chat.
    pub fn is_group(&self) -> bool {
        is_group_user_name(&self.user_name)
    }

    /// Name used when other members mention this contact.
    ///
    /// The group display name wins over the nickname when both are set.
    pub fn mention_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nick_name
        } else {
            &self.display_name
        }
    }
}
