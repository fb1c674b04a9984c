mod support;

use std::time::Duration;

use campus_backend_traits::{ConversationScope, MessageRow, NewMessage};
use campus_core::{AppAction, AppUpdate, AuthState, ConnectionStatus, Screen};
use chrono::DateTime;
use support::{wait_until, Harness, TIMEOUT};

fn private_row(id: &str, sender: &str, recipient: &str, body: &str, ms: i64) -> MessageRow {
    MessageRow {
        id: id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: Some(recipient.to_string()),
        club_id: None,
        body: body.to_string(),
        message_type: "text".to_string(),
        created_at: DateTime::from_timestamp_millis(ms).unwrap(),
        sender_name: None,
        sender_avatar_url: None,
    }
}

fn club_row(id: &str, sender: &str, club: &str, body: &str, ms: i64) -> MessageRow {
    MessageRow {
        recipient_id: None,
        club_id: Some(club.to_string()),
        ..private_row(id, sender, "", body, ms)
    }
}

fn club_message(sender: &str, club: &str, body: &str) -> NewMessage {
    NewMessage::text(&ConversationScope::club(club), sender, body).unwrap()
}

#[test]
fn login_navigates_home_with_sequential_revs() {
    let h = Harness::new();
    assert_eq!(h.app.state().router.default_screen, Screen::Login);

    h.login_alice();
    let s = h.app.state();
    assert_eq!(
        s.auth,
        AuthState::LoggedIn {
            user_id: "alice".into()
        }
    );
    assert_eq!(s.router.default_screen, Screen::Home);
    assert!(!s.busy.logging_in);

    let up = h.updates.lock().unwrap();
    assert!(!up.is_empty());
    // Revs must be strictly increasing by 1.
    for w in up.windows(2) {
        assert_eq!(w[0].rev() + 1, w[1].rev());
    }
}

#[test]
fn wrong_password_shows_toast_and_stays_logged_out() {
    let h = Harness::new();
    h.app.dispatch(AppAction::Login {
        email: "alice@campus.test".into(),
        password: "nope".into(),
    });
    wait_until("toast shown", TIMEOUT, || h.app.state().toast.is_some());
    let s = h.app.state();
    assert_eq!(s.auth, AuthState::LoggedOut);
    assert!(!s.busy.logging_in);

    h.app.dispatch(AppAction::ClearToast);
    wait_until("toast cleared", TIMEOUT, || h.app.state().toast.is_none());
}

#[test]
fn opening_a_conversation_requires_login() {
    let h = Harness::new();
    h.app.dispatch(AppAction::OpenConversation {
        target: campus_core::ConversationTarget::Club {
            club_id: "chess".into(),
        },
    });
    wait_until("toast shown", TIMEOUT, || h.app.state().toast.is_some());
    assert!(h.app.state().router.screen_stack.is_empty());
    assert!(h.app.state().current_chat.is_none());
}

#[test]
fn club_send_confirms_exactly_one_message() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");
    assert!(h.messages().is_empty());

    h.send("hello");
    wait_until("message confirmed", TIMEOUT, || {
        h.messages()
            .iter()
            .any(|m| m.body == "hello" && !m.is_pending)
    });
    // Give a late echo or ack the chance to misbehave.
    std::thread::sleep(Duration::from_millis(200));

    let msgs = h.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].id, "m1");
    assert_eq!(msgs[0].body, "hello");
    assert!(msgs[0].is_mine);
    assert!(!msgs[0].is_pending);
    assert_eq!(h.app.state().current_chat.unwrap().draft, "");
}

#[test]
fn send_shows_pending_record_first() {
    let h = Harness::new();
    h.backend
        .update_faults(|f| f.insert_delay = Some(Duration::from_millis(400)));
    h.login_alice();
    h.open_club("chess");

    h.send("  wait for it  ");
    wait_until("pending shown", TIMEOUT, || {
        h.messages()
            .iter()
            .any(|m| m.is_pending && m.body == "wait for it")
    });
    assert!(h.messages()[0].id.starts_with("pending:"));
    wait_until("confirmed", TIMEOUT, || {
        h.messages().len() == 1 && !h.messages()[0].is_pending
    });
}

#[test]
fn echo_before_ack_nets_one_record() {
    let h = Harness::new();
    h.backend
        .update_faults(|f| f.ack_delay = Some(Duration::from_millis(300)));
    h.login_alice();
    h.open_club("chess");

    h.send("race");
    wait_until("echo folded", TIMEOUT, || {
        h.messages().iter().any(|m| m.id == "m1")
    });
    assert_eq!(h.messages().len(), 1, "{:?}", h.messages());

    std::thread::sleep(Duration::from_millis(500));
    let msgs = h.messages();
    assert_eq!(msgs.len(), 1);
    assert!(!msgs[0].is_pending);
}

#[test]
fn lost_echo_still_confirms_through_insert_ack() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.suppress_echo = true);
    h.login_alice();
    h.open_club("chess");

    h.send("quiet");
    wait_until("confirmed by ack", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 1 && msgs[0].id == "m1" && !msgs[0].is_pending
    });
}

#[test]
fn failed_send_rolls_back_and_restores_draft() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.fail_inserts = true);
    h.login_alice();
    h.open_club("chess");

    h.send("oops");
    wait_until("toast shown", TIMEOUT, || h.app.state().toast.is_some());
    let chat = h.app.state().current_chat.unwrap();
    assert!(chat.messages.is_empty());
    assert_eq!(chat.draft, "oops");
}

#[test]
fn failed_send_keeps_a_newer_draft() {
    let h = Harness::new();
    h.backend.update_faults(|f| {
        f.fail_inserts = true;
        f.insert_delay = Some(Duration::from_millis(300));
    });
    h.login_alice();
    h.open_club("chess");

    h.send("first");
    h.app.dispatch(AppAction::UpdateDraft {
        text: "typing more".into(),
    });
    wait_until("toast shown", TIMEOUT, || h.app.state().toast.is_some());
    assert_eq!(h.app.state().current_chat.unwrap().draft, "typing more");
}

#[test]
fn private_history_interleaves_both_directions() {
    let h = Harness::new();
    h.backend
        .seed_message(private_row("a1", "alice", "bob", "A1", 1_000));
    h.backend
        .seed_message(private_row("b1", "bob", "alice", "B1", 2_000));
    h.backend
        .seed_message(private_row("a2", "alice", "bob", "A2", 3_000));
    // Not part of the conversation.
    h.backend
        .seed_message(private_row("x1", "bob", "carol", "other", 1_500));
    h.backend
        .seed_message(club_row("c1", "bob", "chess", "club", 2_500));

    h.login_alice();
    h.open_private("bob");

    wait_until("history shown", TIMEOUT, || h.messages().len() == 3);
    let msgs = h.messages();
    let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b1", "a2"]);
    assert!(msgs[0].is_mine && !msgs[1].is_mine);

    wait_until("peer profile resolved", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .and_then(|c| c.title)
            .as_deref()
            == Some("Bob")
    });
}

#[test]
fn club_history_is_oldest_first() {
    let h = Harness::new();
    h.backend
        .seed_message(club_row("c1", "bob", "chess", "e4", 1_000));
    h.backend
        .seed_message(club_row("c2", "alice", "chess", "e5", 2_000));
    h.backend
        .seed_message(club_row("g1", "bob", "go", "elsewhere", 1_500));

    h.login_alice();
    h.open_club("chess");
    wait_until("history shown", TIMEOUT, || h.bodies() == vec!["e4", "e5"]);
}

#[test]
fn history_failure_shows_empty_timeline() {
    let h = Harness::new();
    h.backend
        .seed_message(club_row("c1", "bob", "chess", "hidden", 1_000));
    h.backend.update_faults(|f| f.fail_history = true);
    h.login_alice();
    h.open_club("chess");

    let s = h.app.state();
    assert!(s.current_chat.unwrap().messages.is_empty());
    assert!(s.toast.is_none());
}

#[test]
fn duplicate_deliveries_are_ignored() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.duplicate_delivery = true);
    h.login_alice();
    h.open_club("chess");

    let row = h.backend.push_message(club_message("bob", "chess", "gm"));
    wait_until("row shown", TIMEOUT, || !h.messages().is_empty());
    h.backend.deliver(&row);
    std::thread::sleep(Duration::from_millis(200));

    let msgs = h.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].sender_name.as_deref(), Some("Bob"));
}

#[test]
fn unknown_sender_gets_placeholder_name() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");

    h.backend.push_message(club_message("zed", "chess", "who am i"));
    wait_until("row shown", TIMEOUT, || !h.messages().is_empty());
    assert_eq!(
        h.messages()[0].sender_name.as_deref(),
        Some("Unknown sender")
    );
}

#[test]
fn realtime_rows_for_other_conversations_are_ignored() {
    let h = Harness::new();
    h.login_alice();
    h.open_private("bob");

    h.backend.push_message(club_message("bob", "chess", "club talk"));
    h.backend.push_message(
        NewMessage::text(&ConversationScope::private("bob", "carol"), "bob", "psst").unwrap(),
    );
    h.backend.push_message(
        NewMessage::text(&ConversationScope::private("bob", "alice"), "bob", "hey alice").unwrap(),
    );
    wait_until("own row shown", TIMEOUT, || {
        h.bodies() == vec!["hey alice".to_string()]
    });
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.bodies(), vec!["hey alice".to_string()]);
}

#[test]
fn crossed_sends_under_match_send_keep_own_pending() {
    let h = Harness::with_policy("match_send");
    h.backend
        .update_faults(|f| f.insert_delay = Some(Duration::from_millis(500)));
    h.login_alice();
    h.open_private("bob");

    h.send("hi bob");
    wait_until("pending shown", TIMEOUT, || {
        h.messages().iter().any(|m| m.is_pending)
    });
    h.backend.push_message(
        NewMessage::text(&ConversationScope::private("bob", "alice"), "bob", "hi alice").unwrap(),
    );
    wait_until("bob's row shown", TIMEOUT, || {
        h.bodies().contains(&"hi alice".to_string())
    });
    // Bob's message does not settle Alice's send.
    assert!(h
        .messages()
        .iter()
        .any(|m| m.is_pending && m.body == "hi bob"));

    wait_until("both confirmed", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 2 && msgs.iter().all(|m| !m.is_pending)
    });
}

#[test]
fn crossed_sends_under_clear_all_drop_own_pending_until_confirmed() {
    let h = Harness::with_policy("clear_all");
    h.backend
        .update_faults(|f| f.insert_delay = Some(Duration::from_millis(500)));
    h.login_alice();
    h.open_private("bob");

    h.send("hi bob");
    wait_until("pending shown", TIMEOUT, || {
        h.messages().iter().any(|m| m.is_pending)
    });
    h.backend.push_message(
        NewMessage::text(&ConversationScope::private("bob", "alice"), "bob", "hi alice").unwrap(),
    );
    wait_until("pending cleared", TIMEOUT, || {
        h.bodies() == vec!["hi alice".to_string()]
    });

    wait_until("own send confirmed", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 2 && msgs.iter().all(|m| !m.is_pending)
    });
}

#[test]
fn rapid_sends_keep_their_order() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");

    for body in ["one", "two", "three"] {
        h.send(body);
    }
    wait_until("all confirmed", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 3 && msgs.iter().all(|m| !m.is_pending)
    });
    assert_eq!(h.bodies(), vec!["one", "two", "three"]);
    let ts: Vec<i64> = h.messages().iter().map(|m| m.created_at_ms).collect();
    assert!(ts.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn identity_failure_navigates_away() {
    let h = Harness::new();
    h.login_alice();
    h.backend.update_faults(|f| f.fail_current_user = true);

    h.app.dispatch(AppAction::OpenConversation {
        target: campus_core::ConversationTarget::Club {
            club_id: "chess".into(),
        },
    });
    wait_until("left conversation", TIMEOUT, || {
        let s = h.app.state();
        s.toast.is_some() && s.router.screen_stack.is_empty() && s.current_chat.is_none()
    });
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.backend.active_subscriptions(), 0);
}

#[test]
fn reconnect_resyncs_missed_messages() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");
    assert_eq!(h.backend.active_subscriptions(), 1);

    h.backend.drop_subscriptions("network blip");
    // Written while the feed was down: only a resync can surface it.
    h.backend
        .seed_message(club_row("missed", "bob", "chess", "while you were out", 1_000));

    wait_until("missed row resynced", TIMEOUT, || {
        h.messages().iter().any(|m| m.id == "missed")
    });
    wait_until("feed live again", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| c.connection == ConnectionStatus::Live)
            .unwrap_or(false)
    });
    assert_eq!(h.backend.active_subscriptions(), 1);
}

#[test]
fn subscribe_failures_retry_with_backoff() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.fail_subscribe = true);
    h.login_alice();
    h.app.dispatch(AppAction::OpenConversation {
        target: campus_core::ConversationTarget::Club {
            club_id: "chess".into(),
        },
    });
    wait_until("reconnecting", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| matches!(c.connection, ConnectionStatus::Reconnecting { attempt } if attempt >= 2))
            .unwrap_or(false)
    });

    h.backend.update_faults(|f| f.fail_subscribe = false);
    wait_until("live", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| c.connection == ConnectionStatus::Live)
            .unwrap_or(false)
    });
    assert_eq!(h.backend.active_subscriptions(), 1);
}

#[test]
fn closing_the_conversation_unsubscribes() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");
    assert_eq!(h.backend.active_subscriptions(), 1);

    h.app.dispatch(AppAction::CloseConversation);
    wait_until("unsubscribed", TIMEOUT, || {
        h.backend.active_subscriptions() == 0 && h.app.state().current_chat.is_none()
    });

    // Rows arriving after unmount are not applied anywhere.
    h.backend.push_message(club_message("bob", "chess", "too late"));
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.app.state().current_chat.is_none());
}

#[test]
fn switching_conversations_keeps_one_subscription() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");
    h.open_private("bob");
    assert_eq!(h.backend.active_subscriptions(), 1);
    assert_eq!(
        h.app.state().current_chat.unwrap().conversation_key,
        "private:bob"
    );

    h.app
        .dispatch(AppAction::UpdateScreenStack { stack: vec![] });
    wait_until("all unsubscribed", TIMEOUT, || {
        h.backend.active_subscriptions() == 0
    });
}

#[test]
fn logout_tears_down_the_session() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");

    h.app.dispatch(AppAction::Logout);
    wait_until("logged out", TIMEOUT, || {
        matches!(h.app.state().auth, AuthState::LoggedOut)
    });
    let s = h.app.state();
    assert_eq!(s.router.default_screen, Screen::Login);
    assert!(s.router.screen_stack.is_empty());
    assert!(s.current_chat.is_none());
    wait_until("unsubscribed", TIMEOUT, || {
        h.backend.active_subscriptions() == 0
    });
}

#[test]
fn new_messages_scroll_to_newest() {
    let h = Harness::new();
    h.login_alice();
    h.open_club("chess");

    h.backend.push_message(club_message("bob", "chess", "ping"));
    wait_until("animated scroll", TIMEOUT, || {
        h.updates.lock().unwrap().iter().any(|u| {
            matches!(
                u,
                AppUpdate::ScrollToNewest { animated: true, conversation_key, .. }
                    if conversation_key == "club:chess"
            )
        })
    });
}

#[test]
fn history_load_scrolls_to_newest_without_animation() {
    let h = Harness::new();
    h.backend
        .seed_message(club_row("c1", "bob", "chess", "e4", 1_000));
    h.login_alice();
    h.open_club("chess");

    let is_history_scroll = |u: &AppUpdate| {
        matches!(
            u,
            AppUpdate::ScrollToNewest { animated: false, conversation_key, .. }
                if conversation_key == "club:chess"
        )
    };
    wait_until("history scroll", TIMEOUT, || {
        h.updates.lock().unwrap().iter().any(is_history_scroll)
    });

    let up = h.updates.lock().unwrap();
    let at = up.iter().position(is_history_scroll).unwrap();
    // The scroll follows the state that carries the loaded history.
    let AppUpdate::FullState(s) = &up[at - 1] else {
        panic!("expected full state before scroll, got {:?}", up[at - 1]);
    };
    let ids: Vec<&str> = s
        .current_chat
        .as_ref()
        .unwrap()
        .messages
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids, vec!["c1"]);
    assert!(!up
        .iter()
        .any(|u| matches!(u, AppUpdate::ScrollToNewest { animated: true, .. })));
}

#[test]
fn late_first_subscribe_resyncs_rows_written_during_the_outage() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.fail_subscribe = true);
    h.login_alice();
    h.app.dispatch(AppAction::OpenConversation {
        target: campus_core::ConversationTarget::Club {
            club_id: "chess".into(),
        },
    });
    wait_until("reconnecting with history settled", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| {
                matches!(c.connection, ConnectionStatus::Reconnecting { .. }) && !c.loading_history
            })
            .unwrap_or(false)
    });

    // No feed is open yet, so only a resync can surface this row.
    h.backend
        .push_message(club_message("bob", "chess", "during outage"));
    h.backend.update_faults(|f| f.fail_subscribe = false);

    wait_until("outage row resynced", TIMEOUT, || {
        h.bodies() == vec!["during outage".to_string()]
    });
    wait_until("live", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| c.connection == ConnectionStatus::Live)
            .unwrap_or(false)
    });
}

#[test]
fn failed_first_load_keeps_messages_confirmed_while_it_ran() {
    let h = Harness::new();
    h.backend.update_faults(|f| {
        f.fail_history = true;
        f.history_delay = Some(Duration::from_millis(800));
    });
    h.login_alice();
    h.app.dispatch(AppAction::OpenConversation {
        target: campus_core::ConversationTarget::Club {
            club_id: "chess".into(),
        },
    });
    wait_until("live with history in flight", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| c.connection == ConnectionStatus::Live && c.loading_history)
            .unwrap_or(false)
    });

    h.send("hello");
    wait_until("send confirmed", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 1 && msgs[0].id == "m1" && !msgs[0].is_pending
    });
    wait_until("history load failed", TIMEOUT, || {
        h.app
            .state()
            .current_chat
            .map(|c| !c.loading_history)
            .unwrap_or(false)
    });

    let msgs = h.messages();
    assert_eq!(msgs.len(), 1, "{msgs:?}");
    assert_eq!(msgs[0].id, "m1");
    assert_eq!(msgs[0].body, "hello");
    assert_eq!(h.backend.messages().len(), 1);
}

#[test]
fn private_row_from_unresolvable_sender_shows_placeholder_until_resolved() {
    let h = Harness::new();
    h.backend.update_faults(|f| f.fail_display_info = true);
    h.login_alice();
    h.open_private("bob");

    let now = chrono::Utc::now().timestamp_millis();
    // Rows straight off the feed carry no sender attributes.
    h.backend
        .deliver(&private_row("r1", "bob", "alice", "first", now));
    wait_until("row shown with placeholder", TIMEOUT, || {
        h.messages()
            .iter()
            .any(|m| m.id == "r1" && m.sender_name.as_deref() == Some("Unknown sender"))
    });
    assert_eq!(
        h.app.state().current_chat.unwrap().title.as_deref(),
        Some("bob")
    );

    h.backend.update_faults(|f| f.fail_display_info = false);
    h.backend
        .deliver(&private_row("r2", "bob", "alice", "second", now + 1));
    wait_until("sender resolved for every row", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 2 && msgs.iter().all(|m| m.sender_name.as_deref() == Some("Bob"))
    });
    assert_eq!(
        h.app.state().current_chat.unwrap().title.as_deref(),
        Some("Bob")
    );
}
