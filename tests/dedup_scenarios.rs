use chrono::{TimeZone, Utc};

use mailthread::sync::dedup::dedupe;
use mailthread::sync::folders::FolderPrecedence;
use mailthread::sync::parser::normalize;
use mailthread::test_support::raw_message;
use mailthread::{NormalizedEmail, RawMessage};

fn scan_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn normalized(raws: Vec<RawMessage>) -> Vec<NormalizedEmail> {
    raws.into_iter()
        .map(|raw| normalize(raw, scan_time()).unwrap())
        .collect()
}

/// The same message without a Message-ID, stored in both folders a few
/// seconds apart.
fn inbox_and_sent_copies() -> Vec<RawMessage> {
    let mut inbox = raw_message(None, "Inbox", "Re: Budget Q3", "Ann <ann@corp.com>", "2024-04-02T14:05:10Z");
    inbox.recipients = vec!["bob@corp.com".to_string()];
    let mut sent = raw_message(None, "Sent Items", "Budget Q3", "ann@corp.com", "2024-04-02T14:05:40Z");
    sent.cc_recipients = vec!["carol@corp.com".to_string()];
    vec![sent, inbox]
}

#[test]
fn inbox_copy_survives_under_default_precedence() {
    let precedence = FolderPrecedence::new(&["Inbox", "Sent Items"]).unwrap();
    let outcome = dedupe(normalized(inbox_and_sent_copies()), &precedence);

    assert_eq!(outcome.duplicates_merged, 1);
    assert_eq!(outcome.emails.len(), 1);
    let survivor = &outcome.emails[0];
    assert_eq!(survivor.folder, "Inbox");
    assert!(survivor.id_synthesized);
    assert!(survivor.participants.contains("bob@corp.com"));
    assert!(survivor.participants.contains("carol@corp.com"));
}

#[test]
fn precedence_order_decides_attribution() {
    let precedence = FolderPrecedence::new(&["Sent Items", "Inbox"]).unwrap();
    let outcome = dedupe(normalized(inbox_and_sent_copies()), &precedence);
    assert_eq!(outcome.emails.len(), 1);
    assert_eq!(outcome.emails[0].folder, "Sent Items");
}

#[test]
fn dedup_ignores_input_order() {
    let precedence = FolderPrecedence::new(&["Inbox", "Sent Items"]).unwrap();
    let mut reversed = inbox_and_sent_copies();
    reversed.reverse();

    let forward = dedupe(normalized(inbox_and_sent_copies()), &precedence);
    let backward = dedupe(normalized(reversed), &precedence);
    assert_eq!(forward.emails, backward.emails);
}

#[test]
fn distinct_message_ids_in_one_folder_are_not_merged_by_content() {
    let precedence = FolderPrecedence::new(&["Inbox"]).unwrap();
    let outcome = dedupe(
        normalized(vec![
            raw_message(Some("<one@x>"), "Inbox", "Ping", "ann@x.com", "2024-04-02T14:05:10Z"),
            raw_message(Some("<two@x>"), "Inbox", "Ping", "ann@x.com", "2024-04-02T14:05:20Z"),
        ]),
        &precedence,
    );
    assert_eq!(outcome.duplicates_merged, 0);
    assert_eq!(outcome.emails.len(), 2);
}

#[test]
fn per_folder_entry_ids_collapse_across_folders() {
    let precedence = FolderPrecedence::new(&["Inbox", "Sent Items"]).unwrap();
    let outcome = dedupe(
        normalized(vec![
            raw_message(Some("<entry-sent-977>"), "Sent Items", "Budget Q3", "ann@corp.com", "2024-04-02T14:05:40Z"),
            raw_message(Some("<entry-inbox-001>"), "Inbox", "RE: Budget Q3", "Ann <ann@corp.com>", "2024-04-02T14:05:10Z"),
        ]),
        &precedence,
    );

    assert_eq!(outcome.duplicates_merged, 1);
    assert_eq!(outcome.emails.len(), 1);
    assert_eq!(outcome.emails[0].folder, "Inbox");
    assert_eq!(outcome.emails[0].id, "entry-inbox-001");
}

#[test]
fn synthesized_ids_are_stable_across_runs() {
    let first = normalized(inbox_and_sent_copies());
    let second = normalized(inbox_and_sent_copies());
    assert_eq!(
        first.iter().map(|e| &e.id).collect::<Vec<_>>(),
        second.iter().map(|e| &e.id).collect::<Vec<_>>()
    );
    assert!(first.iter().all(|e| e.id.starts_with("synthetic-")));
}

#[test]
fn absorbed_ids_are_rewritten_in_replies() {
    let precedence = FolderPrecedence::new(&["Inbox", "Sent Items"]).unwrap();
    let mut emails = normalized(inbox_and_sent_copies());
    let sent_id = emails
        .iter()
        .find(|e| e.folder == "Sent Items")
        .map(|e| e.id.clone())
        .unwrap();

    let mut reply = raw_message(Some("<reply@corp.com>"), "Inbox", "Re: Budget Q3", "bob@corp.com", "2024-04-02T15:00:00Z");
    reply.in_reply_to = Some(sent_id.clone());
    emails.extend(normalized(vec![reply]));

    let outcome = dedupe(emails, &precedence);
    let survivor_id = outcome
        .emails
        .iter()
        .find(|e| e.id.starts_with("synthetic-"))
        .map(|e| e.id.clone())
        .unwrap();
    let reply = outcome.emails.iter().find(|e| e.id == "reply@corp.com").unwrap();
    assert_ne!(survivor_id, sent_id);
    assert_eq!(reply.in_reply_to.as_deref(), Some(survivor_id.as_str()));
}
