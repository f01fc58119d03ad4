use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use bl_domain::config::Config;
use bl_domain::event::{InboundEvent, ReplyTarget};
use bl_sessions::{
    Context, Dispatcher, Flow, Handler, Outcome, RecordingOutbound, Receiver, SelectOptions,
    SessionScope, Sent,
};

const BOT: u64 = 1;

fn group(user: u64, text: &str) -> InboundEvent {
    InboundEvent::group(BOT, 42, user, text)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn waiting(receiver: &Receiver) -> bool {
    receiver.live_sessions().iter().any(|s| s.waiting)
}

fn setup(config: Config) -> (Dispatcher, Arc<RecordingOutbound>) {
    let out = Arc::new(RecordingOutbound::new());
    (Dispatcher::new(&config, out.clone()), out)
}

fn single(outcomes: Vec<Outcome>) -> Outcome {
    assert_eq!(outcomes.len(), 1);
    outcomes.into_iter().next().unwrap()
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn weather(cx: Context) -> Flow {
    if cx.event().text != "查询" {
        return Ok(());
    }
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    session.send_text("Which city?").await;
    let word = session.get("word", true, Some(Duration::from_secs(5))).await;
    match word.as_ref().and_then(|v| v.as_str()) {
        Some(city) => {
            session.send_text(&format!("weather for {city}")).await;
            Ok(())
        }
        None => Err(session.finish("no city, bye")),
    }
}

async fn picker(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let opts = SelectOptions {
        prompt: "Pick one:".into(),
        retry_times: 2,
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    match session.select(&["a", "b", "c"], |s| s.to_string(), opts).await {
        Some((choice, index)) => session.send_text(&format!("{choice}@{index}")).await,
        None => session.send_text("nothing picked").await,
    }
    Ok(())
}

async fn numbers_only(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let reply = session.must_text("Enter a number", Some(Duration::from_secs(5))).await?;
    if reply.trim().parse::<u32>().is_err() {
        return Err(session.reject());
    }
    session.send_text(&format!("got {reply}")).await;
    Ok(())
}

async fn impatient(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    session.set_farewell(bl_sessions::FarewellSource::producer(|| "too slow".into()));
    let _ = session.must_text("Quick, say something", Some(Duration::from_secs(1))).await?;
    Ok(())
}

async fn follows_into_private(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let event = session
        .must_friend_event("Tell me privately", Some(Duration::from_secs(5)))
        .await?;
    session.send_text(&format!("secret: {}", event.text)).await;
    Ok(())
}

async fn idle_waiter(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let _ = session.get("never", true, Some(Duration::from_secs(120))).await;
    Ok(())
}

async fn slow_starter(cx: Context) -> Flow {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let reply = session.must_text("", Some(Duration::from_secs(5))).await?;
    session.send_text(&format!("late reply: {reply}")).await;
    Ok(())
}

async fn sleeper(_cx: Context) -> Flow {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Ok(())
}

async fn panics(_cx: Context) -> Flow {
    panic!("plugin bug")
}

fn blocking_weather(cx: Context) -> Flow {
    let session = cx.start_session(SessionScope::PerUserInGroup)?;
    let word = cx.block_on(session.get("word", true, Some(Duration::from_secs(5))));
    let city = word
        .as_ref()
        .and_then(|v| v.as_str())
        .unwrap_or("nowhere")
        .to_owned();
    cx.block_on(session.send_text(&format!("blocking weather for {city}")));
    Ok(())
}

/// Records every `start_session` error it runs into.
#[derive(Clone, Default)]
struct SessionErrors {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Handler for SessionErrors {
    async fn handle(&self, cx: Context) -> Flow {
        let first = cx.start_session(SessionScope::WholeGroup);
        if let Err(e) = &first {
            self.seen.lock().push(e.to_string());
        }
        if let Err(e) = cx.start_session(SessionScope::WholeGroup) {
            self.seen.lock().push(e.to_string());
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_then_reply_unblocks_keyed_get() {
    let (d, out) = setup(Config::default());
    let r = d.register(d.receiver("weather").handler(weather));

    let first = single(d.dispatch_and_wait(group(7, "查询")).await);
    let inv = first.invocation().expect("fresh invocation").clone();
    wait_until(|| waiting(&r)).await;
    assert_eq!(r.live_sessions()[0].session_id, "42-7");

    let second = single(d.dispatch_and_wait(group(7, "beijing")).await);
    assert_eq!(second.delivered_to().unwrap().to_string(), "42-7");

    inv.finished().await;
    assert_eq!(out.texts(), vec!["Which city?", "weather for beijing"]);
}

#[tokio::test]
async fn other_user_gets_a_fresh_invocation() {
    let (d, _out) = setup(Config::default());
    let r = d.register(d.receiver("weather").handler(weather));

    d.dispatch_and_wait(group(7, "查询")).await;
    wait_until(|| waiting(&r)).await;

    let other = single(d.dispatch_and_wait(group(8, "shanghai")).await);
    assert!(other.invocation().is_some());
    assert!(waiting(&r));
}

#[tokio::test]
async fn own_messages_never_touch_sessions() {
    let (d, _out) = setup(Config::default());
    let r = d.register(d.receiver("weather").handler(weather));

    let outcome = single(d.dispatch_and_wait(group(BOT, "查询")).await);
    assert!(matches!(outcome, Outcome::IgnoredSelf));
    assert!(r.live_sessions().is_empty());
}

#[tokio::test]
async fn start_session_errors_are_reported() {
    let (d, _out) = setup(Config::default());
    let errors = SessionErrors::default();
    d.register(d.receiver("errors").handler(errors.clone()));

    let outcome = single(d.dispatch_and_wait(group(7, "x")).await);
    outcome.invocation().unwrap().finished().await;
    let outcome = single(d.dispatch_and_wait(InboundEvent::generic(BOT, "group_join")).await);
    outcome.invocation().unwrap().finished().await;

    let seen = errors.seen.lock().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], "session already exists: 42");
    assert!(seen[1].starts_with("unsupported scope"));
    assert!(seen[2].starts_with("unsupported scope"));
}

#[tokio::test]
async fn select_over_the_wire() {
    let (d, out) = setup(Config::default());
    let r = d.register(d.receiver("picker").handler(picker));

    let inv = single(d.dispatch_and_wait(group(7, "pick")).await);
    let inv = inv.invocation().unwrap().clone();

    wait_until(|| waiting(&r)).await;
    let delivered = single(d.dispatch_and_wait(group(7, "9")).await);
    assert!(delivered.delivered_to().is_some());

    wait_until(|| waiting(&r)).await;
    single(d.dispatch_and_wait(group(7, "2")).await);

    inv.finished().await;
    let texts = out.texts();
    assert!(texts[0].starts_with("Pick one:\n【1】 a"));
    assert!(texts[1].starts_with("Invalid number, try again."));
    assert_eq!(texts.last().map(String::as_str), Some("b@1"));
}

#[tokio::test]
async fn reject_ends_invocation_and_next_message_is_fresh() {
    let (d, out) = setup(Config::default());
    let r = d.register(d.receiver("numbers").handler(numbers_only));

    let first = single(d.dispatch_and_wait(group(7, "start")).await);
    let inv = first.invocation().unwrap().clone();
    wait_until(|| waiting(&r)).await;

    single(d.dispatch_and_wait(group(7, "abc")).await);
    inv.finished().await;
    assert_eq!(out.texts(), vec!["Enter a number"]);

    let next = single(d.dispatch_and_wait(group(7, "12")).await);
    assert!(next.invocation().is_some());
}

#[tokio::test(start_paused = true)]
async fn must_text_timeout_sends_farewell() {
    let (d, out) = setup(Config::default());
    d.register(d.receiver("impatient").handler(impatient));

    let outcome = single(d.dispatch_and_wait(group(7, "go")).await);
    outcome.invocation().unwrap().finished().await;

    assert_eq!(
        out.sent().last(),
        Some(&Sent::Text {
            target: ReplyTarget::Group { group_id: 42 },
            text: "too slow".into(),
        })
    );
}

#[tokio::test]
async fn member_session_follows_user_into_private_chat() {
    let (d, out) = setup(Config::default());
    let r = d.register(d.receiver("private").handler(follows_into_private));

    let inv = single(d.dispatch_and_wait(group(7, "start")).await);
    let inv = inv.invocation().unwrap().clone();
    wait_until(|| waiting(&r)).await;

    // A group reply is not what the session waits for.
    let group_reply = single(d.dispatch_and_wait(group(7, "not here")).await);
    assert!(group_reply.invocation().is_some());

    let private = single(d.dispatch_and_wait(InboundEvent::friend(BOT, 7, "psst")).await);
    assert_eq!(private.delivered_to().unwrap().to_string(), "42-7");

    inv.finished().await;
    let last = out.sent().last().cloned().unwrap();
    assert_eq!(
        last,
        Sent::Text {
            target: ReplyTarget::Friend { user_id: 7 },
            text: "secret: psst".into(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_and_is_collected() {
    let mut config = Config::default();
    config.sessions.expiration_secs = 60;
    let (d, _out) = setup(config);
    let r = d.register(d.receiver("idle").handler(idle_waiter));

    single(d.dispatch_and_wait(group(7, "start")).await);
    wait_until(|| waiting(&r)).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(r.live_sessions().is_empty());

    let next = single(d.dispatch_and_wait(group(7, "hello")).await);
    assert!(next.invocation().is_some());
}

#[tokio::test]
async fn grace_period_routes_early_follow_up_into_new_session() {
    let mut config = Config::default();
    config.sessions.skip_responder = false;
    let (d, out) = setup(config);
    d.register(d.receiver("slow").uses_sessions(true).handler(slow_starter));

    let first = single(d.dispatch_and_wait(group(7, "start")).await);
    let inv = first.invocation().unwrap().clone();

    let follow_up = single(d.dispatch_and_wait(group(7, "early")).await);
    assert_eq!(follow_up.delivered_to().unwrap().to_string(), "42-7");

    inv.finished().await;
    assert_eq!(out.texts(), vec!["late reply: early"]);
}

#[tokio::test(start_paused = true)]
async fn grace_period_is_bounded() {
    let (d, _out) = setup(Config::default());
    d.register(d.receiver("sleepy").uses_sessions(true).handler(sleeper));

    single(d.dispatch_and_wait(group(7, "one")).await);
    let started = tokio::time::Instant::now();
    let second = single(d.dispatch_and_wait(group(7, "two")).await);
    assert!(second.invocation().is_some());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn panicking_handler_does_not_poison_dispatch() {
    let (d, out) = setup(Config::default());
    d.register(d.receiver("broken").handler(panics));
    let r = d.register(d.receiver("weather").handler(weather));

    let outcomes = d.dispatch_and_wait(group(7, "查询")).await;
    assert_eq!(outcomes.len(), 2);
    outcomes[0].invocation().unwrap().finished().await;
    wait_until(|| waiting(&r)).await;
    assert_eq!(out.texts(), vec!["Which city?"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_handler_waits_on_pool() {
    let (d, out) = setup(Config::default());
    let r = d.register(d.receiver("blocking").blocking_handler(blocking_weather));

    let first = single(d.dispatch_and_wait(group(7, "查询")).await);
    let inv = first.invocation().unwrap().clone();
    wait_until(|| waiting(&r)).await;

    let second = single(d.dispatch_and_wait(group(7, "tokyo")).await);
    assert!(second.delivered_to().is_some());

    inv.finished().await;
    assert_eq!(out.texts(), vec!["blocking weather for tokyo"]);
}
