//! Sync loop: long-poll the server and turn each batch into bus events.
//!
//! Within a batch, contact deletions are emitted first, then modifications,
//! then new messages. Events go out one at a time through the server source,
//! so their order on the bus matches this order.

use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::client::SessionContext;
use crate::protocol::response::{RawMessage, SyncResponse};
use crate::protocol::{ApiError, WebApi};
use crate::store::{Roster, Session};
use crate::types::{is_group_user_name, Contact, ContactChangeKind, Event, MessageData};

/// Separates the real sender from the body of a group message.
pub const GROUP_SENDER_DELIMITER: &str = ":<br/>";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync failed: {0}")]
    SyncFailed(#[from] ApiError),

    #[error("no live session")]
    NotLoggedIn,

    #[error("event bus closed")]
    BusClosed,

    #[error("sender {sender} not found in group {group}")]
    ContactLookupFailed { group: String, sender: String },
}

/// Download endpoint for a media message, if the type carries media.
pub fn media_route(msg_type: i64, has_product_id: i64) -> Option<&'static str> {
    match msg_type {
        3 => Some("webwxgetmsgimg"),
        47 if has_product_id == 0 => Some("webwxgetmsgimg"),
        34 => Some("webwxgetvoice"),
        43 => Some("webwxgetvideo"),
        _ => None,
    }
}

pub fn media_url(base_url: &str, route: &str, msg_id: &str, skey: &str) -> String {
    format!("{base_url}/{route}?msgid={msg_id}&skey={skey}")
}

/// The group a message belongs to, if any.
pub fn group_of(raw: &RawMessage) -> Option<&str> {
    if is_group_user_name(&raw.from_user_name) {
        Some(&raw.from_user_name)
    } else if is_group_user_name(&raw.to_user_name) {
        Some(&raw.to_user_name)
    } else {
        None
    }
}

/// Result of decoding one added message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(MessageData),
    /// A group message from someone else without the sender prefix.
    MissingSender,
    /// The sender prefix names nobody known in the roster.
    UnknownSender { group: String, sender: String },
}

/// Classify a message and resolve its real sender against the roster.
pub fn decode_message(raw: &RawMessage, original: Value, session: &Session, roster: &Roster) -> Decoded {
    let group = group_of(raw);
    let is_sent_by_myself = raw.from_user_name == session.user_name();

    let mut content = raw.content.clone();
    let mut sender_user_name = raw.from_user_name.clone();
    let mut at_me = false;

    if let (Some(group), false) = (group, is_sent_by_myself) {
        let parts: Vec<&str> = raw.content.split(GROUP_SENDER_DELIMITER).collect();
        let [sender, body] = parts.as_slice() else {
            return Decoded::MissingSender;
        };
        let Some(contact) = roster.contact(sender) else {
            return Decoded::UnknownSender {
                group: group.to_string(),
                sender: sender.to_string(),
            };
        };

        let mention = format!("@{}", session.myself.mention_name());
        at_me = mention.len() > 1 && body.contains(&mention);
        sender_user_name = contact.user_name;
        content = body.to_string();
    }

    let download = media_route(raw.msg_type, raw.has_product_id)
        .map(|route| media_url(&session.base_url, route, &raw.msg_id, session.skey()));

    Decoded::Message(MessageData {
        is_group: group.is_some(),
        is_media: download.is_some(),
        is_sent_by_myself,
        msg_type: raw.msg_type,
        at_me,
        media_url: download,
        content,
        from_user_name: raw.from_user_name.clone(),
        sender_user_name,
        to_user_name: raw.to_user_name.clone(),
        raw: original,
    })
}

/// Replace the roster with the server's full contact list.
pub async fn sync_contacts<A: WebApi>(api: &A, context: &SessionContext) -> Result<usize, SyncError> {
    let session = context.session().ok_or(SyncError::NotLoggedIn)?;
    let mut contacts: Vec<Contact> = Vec::new();
    let mut seq = 0;
    loop {
        let page = api.fetch_contacts(&session, seq).await?;
        page.base_response.check()?;
        contacts.extend(page.member_list);
        if page.seq == 0 || page.seq == seq {
            break;
        }
        seq = page.seq;
    }
    let count = contacts.len();
    context.roster().replace_contacts(contacts);
    info!("synchronized {count} contacts");
    Ok(count)
}

/// Fetch a group's record and member list.
pub async fn refresh_group<A: WebApi>(api: &A, context: &SessionContext, group: &str) -> Result<(), SyncError> {
    let session = context.session().ok_or(SyncError::NotLoggedIn)?;
    let response = api.fetch_groups(&session, &[group.to_string()]).await?;
    response.base_response.check()?;
    for record in response.contact_list {
        debug!("group {} has {} members", record.user_name, record.member_list.len());
        context.roster().put_group(record);
    }
    Ok(())
}

/// Fetch a group's member list unless it is already known.
pub async fn update_group_if_needed<A: WebApi>(
    api: &A,
    context: &SessionContext,
    group: &str,
) -> Result<(), SyncError> {
    if context.roster().has_group_members(group) {
        return Ok(());
    }
    refresh_group(api, context, group).await
}

async fn emit(events: &mpsc::Sender<Event>, event: Event) -> Result<(), SyncError> {
    events.send(event).await.map_err(|_| SyncError::BusClosed)
}

/// Emit the contents of one batch, in order: deletions, modifications, messages.
pub async fn dispatch_batch<A: WebApi>(
    api: &A,
    context: &SessionContext,
    batch: SyncResponse,
    events: &mpsc::Sender<Event>,
) -> Result<(), SyncError> {
    let messages = batch.messages()?;

    for removed in batch.del_contact_list {
        context.roster().remove_contact(&removed.user_name);
        let stub = Contact::with_user_name(removed.user_name);
        emit(events, Event::contact_change(ContactChangeKind::Delete, stub)).await?;
    }

    for modified in batch.mod_contact_list {
        context.roster().upsert_contact(modified.clone());
        emit(events, Event::contact_change(ContactChangeKind::Modify, modified)).await?;
    }

    for (raw, original) in messages {
        if let Some(group) = group_of(&raw) {
            if let Err(err) = update_group_if_needed(api, context, group).await {
                warn!("failed to fetch members of {group}: {err}");
            }
        }

        let session = context.session().ok_or(SyncError::NotLoggedIn)?;
        match decode_message(&raw, original, &session, context.roster()) {
            Decoded::Message(data) => emit(events, Event::new_message(data)).await?,
            Decoded::MissingSender => {
                warn!("dropping group message {} without sender prefix", raw.msg_id);
            }
            Decoded::UnknownSender { group, sender } => {
                let err = SyncError::ContactLookupFailed {
                    group: group.clone(),
                    sender,
                };
                warn!("dropping message {}: {err}", raw.msg_id);
                if let Err(err) = refresh_group(api, context, &group).await {
                    warn!("failed to refresh group {group}: {err}");
                }
            }
        }
    }
    Ok(())
}

/// Poll until something fails. Returns the error that ended the loop.
pub async fn run_sync_loop<A: WebApi>(
    api: &A,
    context: &SessionContext,
    events: &mpsc::Sender<Event>,
) -> SyncError {
    loop {
        if let Err(err) = sync_once(api, context, events).await {
            return err;
        }
    }
}

/// One long-poll, and one batch fetch if the server signals changes.
pub async fn sync_once<A: WebApi>(
    api: &A,
    context: &SessionContext,
    events: &mpsc::Sender<Event>,
) -> Result<(), SyncError> {
    let session = context.session().ok_or(SyncError::NotLoggedIn)?;
    let check = api.sync_check(&session).await?;
    if !check.is_alive() {
        return Err(SyncError::SyncFailed(ApiError::Server {
            ret: check.retcode,
            message: "sync check rejected".to_string(),
        }));
    }
    if !check.has_update() {
        return Ok(());
    }
    debug!("sync selector {}", check.selector);

    let batch = api.sync(&session).await?;
    batch.base_response.check()?;
    context.update_session(|session| {
        if !batch.sync_key.is_empty() {
            session.sync_key = batch.sync_key.clone();
        }
        if !batch.skey.is_empty() {
            session.base_request.skey = batch.skey.clone();
        }
    });
    dispatch_batch(api, context, batch, events).await
}
