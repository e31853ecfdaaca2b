//! Bot event loop — ties router, cache, renderer and dispatcher together.
//!
//! # Scheduling
//!
//! One loop receives inbound events and parses them one at a time (parsing
//! is synchronous and cheap). Each successfully parsed command is then
//! handled on its own spawned task, so lookups and renders for independent
//! subjects overlap freely. Within one command the steps stay ordered:
//! resolve → render → dispatch.
//!
//! # Error policy
//!
//! Nothing here is process-fatal. Every failure is converted to a short
//! user-readable reply; internal causes stay in the logs. The loop always
//! returns to waiting for the next event.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, Reply, Transport};
use crate::error::AppError;
use crate::lookup::{Fetch, LookupError, SubjectCache};
use crate::render::{LayoutTemplate, RenderEngine, RenderError, RenderJob};
use crate::router::{self, Command, CommandName, ParseError, Parsed};
use crate::runtime::{Component, ComponentFuture};

// ── Events ───────────────────────────────────────────────────────────────────

/// One inbound chat event, as handed over by a transport channel.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Opaque channel/user identifier — also the reply destination.
    pub origin: String,
    pub text: String,
}

// ── Bot ──────────────────────────────────────────────────────────────────────

/// The assembled pipeline. Clones share the cache, engine and dispatcher,
/// which is what lets each command run on its own task.
#[derive(Debug)]
pub struct Bot<F: Fetch, T: Transport> {
    prefix: String,
    cache: SubjectCache<F>,
    engine: RenderEngine,
    dispatcher: Dispatcher<T>,
}

impl<F: Fetch, T: Transport> Clone for Bot<F, T> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            cache: self.cache.clone(),
            engine: self.engine.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<F: Fetch, T: Transport> Bot<F, T> {
    pub fn new(
        prefix: impl Into<String>,
        cache: SubjectCache<F>,
        engine: RenderEngine,
        dispatcher: Dispatcher<T>,
    ) -> Self {
        Self { prefix: prefix.into(), cache, engine, dispatcher }
    }

    /// Run the event loop until `shutdown` is cancelled or the event source
    /// closes.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), AppError> {
        info!("bot event loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received — closing bot loop");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event source closed — bot loop exiting");
                        break;
                    };
                    self.accept(event);
                }
            }
        }

        Ok(())
    }

    /// Parse one event and, for commands, hand it to a per-command task.
    fn accept(&self, event: InboundEvent) {
        match router::parse(&event.text, &event.origin, &self.prefix) {
            Ok(Parsed::NotACommand) => {
                // Ordinary chat — not ours.
            }
            Ok(Parsed::Command(command)) => {
                debug!(origin = %command.origin, name = %command.name, "command accepted");
                let bot = self.clone();
                tokio::spawn(async move { bot.handle_command(command).await });
            }
            Err(parse_err) => {
                debug!(origin = %event.origin, error = %parse_err, "command rejected");
                let bot = self.clone();
                let guidance = guidance_for(&parse_err);
                tokio::spawn(async move {
                    bot.deliver(Reply::Text(guidance), &event.origin).await;
                });
            }
        }
    }

    /// Resolve → render → dispatch for one command, in order.
    async fn handle_command(&self, command: Command) {
        let reply = self.execute(&command).await;
        self.deliver(reply, &command.origin).await;
    }

    async fn deliver(&self, reply: Reply, destination: &str) {
        if let Err(e) = self.dispatcher.dispatch(&reply, destination).await {
            // Retries already happened inside the dispatcher; log and move on.
            error!(destination, error = %e, "reply delivery failed");
        }
    }

    /// Produce the reply for a parsed command. Infallible by design — every
    /// error becomes user-readable text here.
    async fn execute(&self, command: &Command) -> Reply {
        match command.name {
            CommandName::Help => Reply::Text(router::usage().to_string()),
            CommandName::Info | CommandName::Schematic | CommandName::Effects => {
                let layout = match layout_for(command) {
                    Ok(layout) => layout,
                    Err(unknown) => {
                        return Reply::Text(format!(
                            "Unknown layout \"{unknown}\" — try info_card, schematic_card or effect_list."
                        ));
                    }
                };
                self.lookup_and_render(command, layout).await
            }
        }
    }

    async fn lookup_and_render(&self, command: &Command, layout: LayoutTemplate) -> Reply {
        let subject_key = command.subject();

        let subject = match self.cache.resolve(&subject_key).await {
            Ok(subject) => subject,
            Err(LookupError::NotFound) => {
                return Reply::Text(format!("No results for \"{subject_key}\"."));
            }
            Err(LookupError::Upstream(msg)) => {
                warn!(key = %subject_key, error = %msg, "lookup failed upstream");
                return Reply::Text(
                    "The substance database is unreachable right now — try again later.".into(),
                );
            }
        };

        let job = RenderJob { subject: subject.clone(), layout };
        match self.engine.render(&job) {
            Ok(artifact) => Reply::Image { artifact, caption: subject.name.clone() },
            Err(RenderError::MissingSchematic) => {
                Reply::Text(format!("No schematic is available for {}.", subject.name))
            }
            Err(e) => {
                // Job details go to the log for diagnosis; the user gets a
                // generic line without internals.
                error!(key = %subject.key, layout = layout.as_str(), error = %e, "render failed");
                Reply::Text("Could not render a response image.".into())
            }
        }
    }
}

/// Default template per command, overridable with `--layout=<template>`.
/// Returns the offending string when the override is not a known template.
fn layout_for(command: &Command) -> Result<LayoutTemplate, String> {
    if let Some(requested) = command.opts.get("layout") {
        return requested.parse().map_err(|_| requested.clone());
    }
    Ok(match command.name {
        CommandName::Info => LayoutTemplate::InfoCard,
        CommandName::Schematic => LayoutTemplate::SchematicCard,
        CommandName::Effects => LayoutTemplate::EffectList,
        // Help never reaches lookup_and_render.
        CommandName::Help => LayoutTemplate::InfoCard,
    })
}

/// User-facing guidance for a parse failure. Never leaks internals — the
/// ParseError display strings are written for end users.
fn guidance_for(err: &ParseError) -> String {
    match err {
        ParseError::Unrecognized(name) => {
            format!("Unknown command \"{name}\". {}", router::usage())
        }
        other => format!("{other}. {}", router::usage()),
    }
}

// ── Component wrapper ────────────────────────────────────────────────────────

/// Adapts the bot loop to the [`Component`] runtime; captures the event
/// receiver at construction like every other component.
pub struct BotComponent<F: Fetch, T: Transport> {
    bot: Bot<F, T>,
    events: mpsc::Receiver<InboundEvent>,
}

impl<F: Fetch, T: Transport> BotComponent<F, T> {
    pub fn new(bot: Bot<F, T>, events: mpsc::Receiver<InboundEvent>) -> Self {
        Self { bot, events }
    }
}

impl<F: Fetch, T: Transport> Component for BotComponent<F, T> {
    fn id(&self) -> &str {
        "bot"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.bot.run(self.events, shutdown))
    }
}
