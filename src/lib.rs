//! feedrelay polls RSS/Atom feeds and relays new entries into chat channels.
//!
//! Subscriptions live in SQLite ([`storage`]). The [`poller`] fetches each one
//! on a timer, picks entries newer than its cursor ([`feed::select`]), renders
//! them and hands them to a [`deliver::DeliverySink`].

pub mod admin;
pub mod config;
pub mod deliver;
pub mod events;
pub mod feed;
pub mod poller;
pub mod storage;
pub mod util;
