//! Transport channels — the bot's seams to the outside world.
//!
//! Each inbound channel implements [`crate::runtime::Component`] and feeds
//! [`crate::bot::InboundEvent`]s into the bot loop; outbound delivery goes
//! through an implementation of [`crate::dispatch::Transport`]. The console
//! pair ships in-tree so the binary runs without any platform client; a real
//! chat platform adapter is an external collaborator wired in the same way.

pub mod console;
