//! Demo plugins shipped with the console.

use std::time::Duration;

use bl_sessions::{Context, Dispatcher, Flow, Handler, SelectOptions, SessionScope};

/// Register every demo plugin on `dispatcher`.
pub fn register_all(dispatcher: &Dispatcher) {
    dispatcher.register(
        dispatcher
            .receiver("weather")
            .author("botline")
            .usage("天气 [city] / weather [city]")
            .uses_sessions(true)
            .handler(Weather),
    );
    dispatcher.register(
        dispatcher
            .receiver("profile")
            .author("botline")
            .usage("profile")
            .uses_sessions(true)
            .handler(ProfileCard),
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Weather
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const WEATHER_TRIGGERS: [&str; 3] = ["天气", "查询", "weather"];

/// `weather beijing` answers at once; a bare `weather` asks for the city
/// and waits on the `word` key.
pub struct Weather;

#[async_trait::async_trait]
impl Handler for Weather {
    async fn handle(&self, cx: Context) -> Flow {
        let text = cx.event().text.trim();
        let Some(rest) = WEATHER_TRIGGERS
            .iter()
            .find_map(|t| text.strip_prefix(t))
        else {
            return Ok(());
        };

        let city = rest.trim();
        if !city.is_empty() {
            cx.reply(&forecast(city)).await;
            return Ok(());
        }

        let session = cx.start_session(SessionScope::PerUserInGroup)?;
        session.set_farewell("No city given, bye.");
        session.send_text("Which city?").await;
        let word = session.get("word", true, None).await;
        match word.as_ref().and_then(|v| v.as_str()).map(str::trim) {
            Some(city) if !city.is_empty() => {
                session.send_text(&forecast(city)).await;
                Ok(())
            }
            _ => Err(session.finish("")),
        }
    }
}

fn forecast(city: &str) -> String {
    format!("Weather for {city}: sunny, 23°C")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profile card
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ROLES: [&str; 3] = ["developer", "designer", "manager"];

/// Walks the user through name, role and a final confirmation.
pub struct ProfileCard;

#[async_trait::async_trait]
impl Handler for ProfileCard {
    async fn handle(&self, cx: Context) -> Flow {
        if cx.event().text.trim() != "profile" {
            return Ok(());
        }
        let session = cx.start_session(SessionScope::PerUserInGroup)?;
        session.set_farewell("Profile cancelled.");
        session.set_default_timeout(Duration::from_secs(60));

        let name = session.must_text("What's your name?", None).await?;
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(session.reject());
        }

        let opts = SelectOptions {
            prompt: format!("Hi {name}, pick a role:"),
            retry_times: 2,
            ..Default::default()
        };
        let Some((role, _)) = session.select(&ROLES, |r| r.to_string(), opts).await else {
            return Err(session.finish(""));
        };

        if session.confirm("Publish your card?", true, None).await {
            session
                .send_text(&format!("┌ {name}\n└ {role}"))
                .await;
            Ok(())
        } else {
            Err(session.finish("Card discarded."))
        }
    }
}
