use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::{DisplayNames, ScheduleConfig};
use crate::models::ReportPeriod;
use crate::pipeline::{ReportPipeline, Trigger};
use crate::report::build_stats_message;
use crate::schedule::describe;
use crate::telegram::{ChatTransport, Message, TelegramClient};

const POLL_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

const USAGE: &str = "Consolidated Monitoring Bot\n\n\
/weekly - generate the weekly report now\n\
/monthly - generate the monthly report now\n\
/stats - show current unique user counts\n\
/schedule - show the report schedule\n\
/help - show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Report(ReportPeriod),
    Stats,
    Schedule,
    Unknown(String),
}

impl Command {
    /// `None` for plain text and for commands addressed to another bot.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let token = token.strip_prefix('/')?;
        let name = match token.split_once('@') {
            Some((name, target)) => {
                if let Some(own) = bot_username {
                    if !target.eq_ignore_ascii_case(own) {
                        return None;
                    }
                }
                name
            }
            None => token,
        };

        Some(match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "weekly" => Command::Report(ReportPeriod::Weekly),
            "monthly" => Command::Report(ReportPeriod::Monthly),
            "stats" => Command::Stats,
            "schedule" => Command::Schedule,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// A chat message reduced to what command handling needs.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub text: String,
}

impl Incoming {
    pub fn from_message(message: &Message) -> Option<Self> {
        Some(Self {
            chat_id: message.chat.id,
            sender_id: message.from.as_ref().map(|user| user.id),
            text: message.text.clone()?,
        })
    }
}

pub struct Dispatcher {
    pipeline: ReportPipeline,
    transport: Arc<dyn ChatTransport>,
    admins: Vec<i64>,
    schedule: ScheduleConfig,
    names: DisplayNames,
}

impl Dispatcher {
    pub fn new(
        pipeline: ReportPipeline,
        transport: Arc<dyn ChatTransport>,
        admins: Vec<i64>,
        schedule: ScheduleConfig,
        names: DisplayNames,
    ) -> Self {
        Self {
            pipeline,
            transport,
            admins,
            schedule,
            names,
        }
    }

    /// The sender or the chat itself must be on the allow-list.
    fn authorized(&self, incoming: &Incoming) -> bool {
        self.admins.contains(&incoming.chat_id)
            || incoming
                .sender_id
                .is_some_and(|sender| self.admins.contains(&sender))
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(err) = self.transport.send_message(chat_id, text).await {
            warn!(chat_id, error = %err, "failed to send reply");
        }
    }

    pub async fn handle(&self, incoming: &Incoming, bot_username: Option<&str>) {
        let Some(command) = Command::parse(&incoming.text, bot_username) else {
            return;
        };
        let chat_id = incoming.chat_id;

        if !self.authorized(incoming) {
            warn!(chat_id, sender = ?incoming.sender_id, ?command, "unauthorized command");
            self.reply(chat_id, "Access denied. You are not authorized to use this bot.")
                .await;
            return;
        }
        info!(chat_id, ?command, "handling command");

        match command {
            Command::Start | Command::Help => self.reply(chat_id, USAGE).await,
            Command::Report(period) => self.send_report(chat_id, period).await,
            Command::Stats => {
                let reference = self.pipeline.clock().today();
                let snapshot = self.pipeline.aggregator().combined_snapshot(reference).await;
                self.reply(chat_id, &build_stats_message(&snapshot, &self.names))
                    .await;
            }
            Command::Schedule => {
                let text = describe(&self.schedule, self.pipeline.clock().timezone());
                self.reply(chat_id, &text).await;
            }
            Command::Unknown(name) => {
                self.reply(chat_id, &format!("Unknown command /{name}. Send /help for the list."))
                    .await;
            }
        }
    }

    async fn send_report(&self, chat_id: i64, period: ReportPeriod) {
        self.reply(chat_id, &format!("Generating {} report, please wait...", period.key()))
            .await;

        let artifact = match self.pipeline.generate(period, Trigger::OnDemand).await {
            Ok(artifact) => artifact,
            Err(err) => {
                self.reply(chat_id, &format!("Failed to generate {} report: {err}", period.key()))
                    .await;
                return;
            }
        };

        let outcome = self
            .pipeline
            .deliver(&artifact, self.transport.as_ref(), &[chat_id])
            .await;
        if !outcome.failed.is_empty() {
            self.reply(chat_id, &format!("Failed to send {} report.", period.key()))
                .await;
        }
    }
}

/// Long-polls for messages and hands each one to the dispatcher on its own
/// task so a slow report does not hold up other commands.
pub async fn poll(client: TelegramClient, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let me = client
        .get_me()
        .await
        .context("failed to reach the bot API, check MONITORING_BOT_TOKEN")?;
    let username: Option<Arc<str>> = me.username.map(Arc::from);
    info!(bot_id = me.id, username = ?username, "bot polling started");

    let mut offset = None;
    loop {
        let updates = match client.get_updates(offset, POLL_SECS).await {
            Ok(updates) => updates,
            Err(err) => {
                warn!(error = %err, "polling for updates failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(incoming) = update.message.as_ref().and_then(Incoming::from_message) else {
                debug!(update_id = update.update_id, "skipping non-text update");
                continue;
            };
            let dispatcher = dispatcher.clone();
            let username = username.clone();
            tokio::spawn(async move {
                dispatcher.handle(&incoming, username.as_deref()).await;
            });
        }
    }
}
