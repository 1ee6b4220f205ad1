mod api;
mod completion;
mod config;
mod image;
mod persona;
mod posting;
mod registry;
mod relay;
mod scheduler;
mod telegram;
mod uniqueness;

use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use api::ApiState;
use completion::Client as CompletionClient;
use config::Config;
use image::ImageClient;
use persona::Persona;
use posting::XClient;
use registry::ChatRegistry;
use relay::{Relay, Reply};
use scheduler::{DailyQuota, PostComposer, Scheduler, SchedulerSettings};
use telegram::TelegramClient;
use uniqueness::UniquenessFilter;

struct BotState {
    relay: Relay<Arc<CompletionClient>>,
    registry: Arc<Mutex<ChatRegistry>>,
    persona: Arc<Persona>,
    telegram: TelegramClient,
    bot_user_id: UserId,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_tracing(&config);

    info!("🐋 Starting orcabot...");
    info!(
        "Posting every {:?}, {} per day max",
        config.post_interval, config.daily_post_limit
    );

    let bot = Bot::new(&config.telegram_bot_token);

    let bot_user_id = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.id
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            UserId(0)
        }
    };

    let persona = Arc::new(Persona::orca());
    let completion = Arc::new(CompletionClient::new(
        config.completion_api_key.clone(),
        config.completion_base_url.clone(),
    ));

    let image = config
        .image_api_key
        .clone()
        .map(|key| ImageClient::new(key, config.image_base_url.clone()));
    if image.is_none() {
        info!("Image generation disabled (no IMAGE_API_KEY)");
    }

    let posting_client = XClient::new(config.posting.clone(), config.posting_base_url());
    if let Err(e) = posting_client.verify_credentials().await {
        warn!("Posting credential check failed: {e}");
    }

    let registry = Arc::new(Mutex::new(ChatRegistry::new()));

    let scheduler = Scheduler::new(
        PostComposer::new(persona.clone(), completion.clone()),
        posting_client,
        TelegramClient::new(bot.clone()),
        registry.clone(),
        persona.clone(),
        UniquenessFilter::new(
            config.history_capacity,
            config.similarity_threshold,
            persona.deny_patterns(),
        ),
        DailyQuota::new(config.daily_post_limit, Utc::now()),
        SchedulerSettings {
            interval: config.post_interval,
            ..SchedulerSettings::default()
        },
    );
    tokio::spawn(scheduler.run());

    let api_state = Arc::new(ApiState {
        completion: completion.clone(),
        persona: persona.clone(),
    });
    let listen_port = config.listen_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, listen_port).await {
            error!("JSON API stopped: {e}");
        }
    });

    let state = Arc::new(BotState {
        relay: Relay::new(persona.clone(), completion, image, config.relay_context_depth),
        registry,
        persona,
        telegram: TelegramClient::new(bot.clone()),
        bot_user_id,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        );
    let registry = tracing_subscriber::registry().with(stdout_layer);

    if let Some(ref dir) = config.log_dir {
        std::fs::create_dir_all(dir).ok();
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("orcabot.log"))
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_filter(
                                tracing_subscriber::EnvFilter::from_default_env()
                                    .add_directive(tracing::Level::INFO.into()),
                            ),
                    )
                    .init();
                return Some(guard);
            }
            Err(e) => {
                registry.init();
                warn!("Failed to open log file in {}: {e}", dir.display());
                return None;
            }
        }
    }

    registry.init();
    None
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;

    // Bot added to a new chat: register it and greet.
    if let Some(members) = msg.new_chat_members() {
        if members.iter().any(|u| u.id == state.bot_user_id) {
            state.registry.lock().await.add(chat_id);
            info!(
                "Added to chat {chat_id} ({})",
                msg.chat.title().unwrap_or("untitled")
            );
            state.telegram.send_message(chat_id, &state.persona.welcome).await.ok();
        }
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(ref user) = msg.from else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    if text.trim() == "/start" || text.starts_with("/start ") {
        state.telegram.send_message(chat_id, &state.persona.welcome).await.ok();
        return Ok(());
    }
    if text.trim() == "/help" {
        state.telegram.send_message(chat_id, &state.persona.usage).await.ok();
        return Ok(());
    }
    if text.trim() == "/clear" {
        state.relay.clear_context(user_id).await;
        state.telegram.send_message(chat_id, &state.persona.clear_ack).await.ok();
        return Ok(());
    }

    match state.relay.handle(user_id, text).await {
        Some(Reply::Text(reply)) => {
            state.telegram.send_message(chat_id, &reply).await.ok();
        }
        Some(Reply::Image { url, caption }) => {
            if state.telegram.send_photo_url(chat_id, &url, &caption).await.is_err() {
                state.telegram.send_message(chat_id, &state.persona.apology).await.ok();
            }
        }
        None => {}
    }

    Ok(())
}
