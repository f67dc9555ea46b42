//! Wire structures of the WeChat Web protocol.
//!
//! The login endpoints answer with script-like text (`window.code=200;`),
//! the redirect target with XML and the session endpoints with JSON. Each
//! shape gets an explicit type here; a missing required field is a decode
//! error rather than a silent default.

use serde::Deserialize;

use crate::protocol::ApiError;
use crate::store::SyncKey;
use crate::types::Contact;

/// Scan-status codes returned by the login polling endpoint.
pub mod scan_codes {
    pub const CONFIRMED: &str = "200";
    pub const SCANNED: &str = "201";
    pub const WAITING: &str = "408";
}

/// Return the text between the first `prefix` and the following `suffix`.
pub fn extract_between<'a>(source: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = source.find(prefix)? + prefix.len();
    let len = source[start..].find(suffix)?;
    Some(&source[start..start + len])
}

fn extract<'a>(source: &'a str, prefix: &str, suffix: &str) -> Result<&'a str, ApiError> {
    extract_between(source, prefix, suffix)
        .ok_or_else(|| ApiError::Unexpected(format!("missing {prefix:?} in {source:?}")))
}

/// Parse the ticket-issuing endpoint's body into the login UUID.
pub fn parse_uuid_response(body: &str) -> Result<String, ApiError> {
    let code = extract(body, "window.QRLogin.code = ", ";")?.trim();
    if code != scan_codes::CONFIRMED {
        return Err(ApiError::Unexpected(format!(
            "unexpected ticket code [{code}], body [{body}]"
        )));
    }
    Ok(extract(body, "window.QRLogin.uuid = \"", "\";")?.to_string())
}

/// Outcome of one scan-status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Nobody has scanned the code yet.
    Waiting,
    /// Scanned on the phone, waiting for the user to confirm.
    Scanned,
    /// Confirmed; continue at the redirect target.
    Confirmed { redirect_url: String },
    /// Any other code: the ticket expired or was refused.
    Rejected { code: String },
}

/// Parse the scan-status endpoint's body.
pub fn parse_scan_response(body: &str) -> Result<ScanStatus, ApiError> {
    let code = extract(body, "window.code=", ";")?.trim();
    Ok(match code {
        scan_codes::WAITING => ScanStatus::Waiting,
        scan_codes::SCANNED => ScanStatus::Scanned,
        scan_codes::CONFIRMED => {
            let redirect = extract(body, "window.redirect_uri=\"", "\";")?;
            ScanStatus::Confirmed {
                redirect_url: format!("{redirect}&fun=new"),
            }
        }
        other => ScanStatus::Rejected {
            code: other.to_string(),
        },
    })
}

/// Credentials handed out by the redirect target, as XML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginTicket {
    pub ret: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub skey: String,
    #[serde(default)]
    pub wxsid: String,
    #[serde(default)]
    pub wxuin: Option<i64>,
    #[serde(default)]
    pub pass_ticket: String,
}

impl LoginTicket {
    /// Decode the redirect target's XML body.
    pub fn from_xml(body: &str) -> Result<Self, ApiError> {
        quick_xml::de::from_str(body.trim()).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub fn is_success(&self) -> bool {
        self.ret == 0
    }
}

/// Status block present in every JSON response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BaseResponse {
    #[serde(rename = "Ret")]
    pub ret: i64,
    #[serde(rename = "ErrMsg", default)]
    pub err_msg: String,
}

impl BaseResponse {
    pub fn is_success(&self) -> bool {
        self.ret == 0
    }

    /// Turn a non-zero return code into an error.
    pub fn check(&self) -> Result<(), ApiError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ApiError::Server {
                ret: self.ret,
                message: self.err_msg.clone(),
            })
        }
    }
}

/// Response of the session-init handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "User")]
    pub user: Contact,
    #[serde(rename = "SKey", alias = "Skey", default)]
    pub skey: String,
    #[serde(rename = "SyncKey", default)]
    pub sync_key: SyncKey,
}

/// Result of a long-poll "is there anything new" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCheck {
    pub retcode: i64,
    pub selector: i64,
}

impl SyncCheck {
    /// The session is still valid.
    pub fn is_alive(&self) -> bool {
        self.retcode == 0
    }

    /// New data is waiting to be fetched.
    pub fn has_update(&self) -> bool {
        self.selector != 0
    }
}

/// Parse `window.synccheck={retcode:"0",selector:"2"}`.
pub fn parse_sync_check(body: &str) -> Result<SyncCheck, ApiError> {
    let number = |field: &str| -> Result<i64, ApiError> {
        let raw = extract(body, &format!("{field}:\""), "\"")?;
        raw.parse()
            .map_err(|_| ApiError::Decode(format!("invalid {field} {raw:?}")))
    };
    Ok(SyncCheck {
        retcode: number("retcode")?,
        selector: number("selector")?,
    })
}

/// One entry of the added-messages list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "MsgId")]
    pub msg_id: String,
    #[serde(rename = "FromUserName")]
    pub from_user_name: String,
    #[serde(rename = "ToUserName")]
    pub to_user_name: String,
    #[serde(rename = "MsgType")]
    pub msg_type: i64,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "HasProductId", default)]
    pub has_product_id: i64,
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
}

/// Incremental-sync batch: three parallel lists of changes.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "AddMsgList", default)]
    pub add_msg_list: Vec<serde_json::Value>,
    #[serde(rename = "ModContactList", default)]
    pub mod_contact_list: Vec<Contact>,
    #[serde(rename = "DelContactList", default)]
    pub del_contact_list: Vec<Contact>,
    #[serde(rename = "SyncKey", default)]
    pub sync_key: SyncKey,
    #[serde(rename = "SKey", alias = "Skey", default)]
    pub skey: String,
}

impl SyncResponse {
    /// Decode the added messages, keeping each raw record alongside.
    pub fn messages(&self) -> Result<Vec<(RawMessage, serde_json::Value)>, ApiError> {
        self.add_msg_list
            .iter()
            .map(|value| {
                serde_json::from_value::<RawMessage>(value.clone())
                    .map(|msg| (msg, value.clone()))
                    .map_err(|e| ApiError::Decode(format!("message record: {e}")))
            })
            .collect()
    }
}

/// One page of the full contact roster.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactListResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MemberList", default)]
    pub member_list: Vec<Contact>,
    #[serde(rename = "Seq", default)]
    pub seq: i64,
}

/// Group records with their member lists.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchContactResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "ContactList", default)]
    pub contact_list: Vec<Contact>,
}

/// Acknowledgement of an outbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MsgID", default)]
    pub msg_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_between() {
        assert_eq!(extract_between("a=[x];", "a=[", "];"), Some("x"));
        assert_eq!(extract_between("a=[x", "a=[", "]"), None);
        assert_eq!(extract_between("nothing", "a=", ";"), None);
    }

    #[test]
    fn test_parse_uuid() {
        let body = r#"window.QRLogin.code = 200; window.QRLogin.uuid = "gYmgd1grLg==";"#;
        assert_eq!(parse_uuid_response(body).unwrap(), "gYmgd1grLg==");

        let refused = r#"window.QRLogin.code = 400; window.QRLogin.uuid = "";"#;
        assert!(parse_uuid_response(refused).is_err());
        assert!(parse_uuid_response("garbage").is_err());
    }

    #[test]
    fn test_parse_scan_statuses() {
        assert_eq!(parse_scan_response("window.code=408;").unwrap(), ScanStatus::Waiting);
        assert_eq!(
            parse_scan_response("window.code=201;window.userAvatar = '';").unwrap(),
            ScanStatus::Scanned
        );
        let confirmed = "window.code=200;\nwindow.redirect_uri=\"https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=A&uuid=B&lang=zh_CN&scan=1\";";
        assert_eq!(
            parse_scan_response(confirmed).unwrap(),
            ScanStatus::Confirmed {
                redirect_url: "https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=A&uuid=B&lang=zh_CN&scan=1&fun=new".to_string()
            }
        );
        assert_eq!(
            parse_scan_response("window.code=400;").unwrap(),
            ScanStatus::Rejected { code: "400".to_string() }
        );
        assert!(parse_scan_response("window.code=200;").is_err());
    }

    #[test]
    fn test_login_ticket_xml() {
        let body = "<error><ret>0</ret><message></message><skey>@crypt_abc</skey><wxsid>sid1</wxsid><wxuin>12345</wxuin><pass_ticket>pt%2B1</pass_ticket><isgrayscale>1</isgrayscale></error>";
        let ticket = LoginTicket::from_xml(body).unwrap();
        assert!(ticket.is_success());
        assert_eq!(ticket.skey, "@crypt_abc");
        assert_eq!(ticket.wxsid, "sid1");
        assert_eq!(ticket.wxuin, Some(12345));
        assert_eq!(ticket.pass_ticket, "pt%2B1");
    }

    #[test]
    fn test_login_ticket_rejection_and_garbage() {
        let rejected = LoginTicket::from_xml("<error><ret>1203</ret><message>denied</message></error>").unwrap();
        assert!(!rejected.is_success());
        assert_eq!(rejected.message, "denied");

        assert!(LoginTicket::from_xml("not xml at all").is_err());
    }

    #[test]
    fn test_parse_sync_check() {
        let check = parse_sync_check(r#"window.synccheck={retcode:"0",selector:"2"}"#).unwrap();
        assert!(check.is_alive());
        assert!(check.has_update());

        let logged_out = parse_sync_check(r#"window.synccheck={retcode:"1101",selector:"0"}"#).unwrap();
        assert!(!logged_out.is_alive());
        assert!(parse_sync_check("window.synccheck={}").is_err());
    }

    #[test]
    fn test_init_response_accepts_either_skey_spelling() {
        let json = r#"{"BaseResponse":{"Ret":0,"ErrMsg":""},"User":{"UserName":"@me","NickName":"Me"},"SKey":"@crypt_new","SyncKey":{"Count":1,"List":[{"Key":1,"Val":9}]}}"#;
        let init: InitResponse = serde_json::from_str(json).unwrap();
        assert_eq!(init.skey, "@crypt_new");
        assert_eq!(init.user.user_name, "@me");
        assert_eq!(init.sync_key.to_query(), "1_9");

        let legacy = r#"{"BaseResponse":{"Ret":0},"User":{"UserName":"@me"},"Skey":"old"}"#;
        let init: InitResponse = serde_json::from_str(legacy).unwrap();
        assert_eq!(init.skey, "old");
    }

    #[test]
    fn test_sync_response_messages_require_fields() {
        let json = r#"{
            "BaseResponse":{"Ret":0,"ErrMsg":""},
            "AddMsgCount":1,
            "AddMsgList":[{"MsgId":"1","FromUserName":"@a","ToUserName":"@b","MsgType":1,"Content":"hi","Extra":true}],
            "ModContactCount":0,"ModContactList":[],
            "DelContactCount":1,"DelContactList":[{"UserName":"@gone"}],
            "SyncKey":{"Count":1,"List":[{"Key":1,"Val":2}]},
            "SKey":""
        }"#;
        let sync: SyncResponse = serde_json::from_str(json).unwrap();
        let messages = sync.messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0.content, "hi");
        assert_eq!(messages[0].1["Extra"], true);
        assert_eq!(sync.del_contact_list[0].user_name, "@gone");

        let broken: SyncResponse = serde_json::from_str(
            r#"{"BaseResponse":{"Ret":0},"AddMsgList":[{"MsgId":"1","Content":"x"}]}"#,
        )
        .unwrap();
        assert!(matches!(broken.messages(), Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_base_response_check() {
        assert!(BaseResponse { ret: 0, err_msg: String::new() }.check().is_ok());
        assert!(matches!(
            BaseResponse { ret: 1101, err_msg: "logout".to_string() }.check(),
            Err(ApiError::Server { ret: 1101, .. })
        ));
    }
}
