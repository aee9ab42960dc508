//! Turns templates, senders, and seeds into the list of sends for a run.
//!
//! Planning is pure: every random choice comes from the caller's `rng`, so a
//! seeded generator reproduces a plan exactly.

use crate::core::models::{MessageCategory, SendRequest, TemplateMessage};
use crate::source::files::AccountRow;
use chrono::{Datelike, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// How many sends each warmup template produces per sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupCounts {
    pub same_sender: usize,
    pub original_sender: usize,
    pub warmup_sender: usize,
}

fn send(sender: &str, recipient: &str, message: &TemplateMessage, category: MessageCategory) -> SendRequest {
    SendRequest {
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        message: message.clone(),
        category,
    }
}

/// `count` recipients from `seeds`: distinct when there are enough of them,
/// with repeats otherwise.
pub fn pick_recipients<R: Rng + ?Sized>(seeds: &[String], count: usize, rng: &mut R) -> Vec<String> {
    if seeds.is_empty() {
        return Vec::new();
    }
    if count <= seeds.len() {
        seeds.choose_multiple(rng, count).cloned().collect()
    } else {
        (0..count)
            .filter_map(|_| seeds.choose(rng).cloned())
            .collect()
    }
}

/// Per template: sends from its own sender, from its original sender when
/// that differs, and from random warmup senders, each to a random seed.
pub fn plan_warmup<R: Rng + ?Sized>(
    messages: &[TemplateMessage],
    seeds: &[String],
    warmup_senders: &[String],
    counts: WarmupCounts,
    rng: &mut R,
) -> Vec<SendRequest> {
    let mut plan = Vec::new();
    if seeds.is_empty() {
        return plan;
    }
    for message in messages {
        let sender = message.sender.as_deref().filter(|s| !s.is_empty());
        let mut senders: Vec<&str> = Vec::new();
        if let Some(s) = sender {
            senders.extend(std::iter::repeat(s).take(counts.same_sender));
            if let Some(original) = message.original_sender.as_deref().filter(|o| !o.is_empty()) {
                if original != s {
                    senders.extend(std::iter::repeat(original).take(counts.original_sender));
                }
            }
        }
        for _ in 0..counts.warmup_sender {
            if let Some(w) = warmup_senders.choose(rng) {
                senders.push(w.as_str());
            }
        }
        for s in senders {
            if let Some(seed) = seeds.choose(rng) {
                plan.push(send(s, seed, message, MessageCategory::Warmup));
            }
        }
    }
    plan
}

/// Every listed sender sends every template once, each to a random seed.
pub fn plan_from_senders<R: Rng + ?Sized>(
    messages: &[TemplateMessage],
    seeds: &[String],
    senders: &[String],
    rng: &mut R,
) -> Vec<SendRequest> {
    let mut plan = Vec::with_capacity(messages.len() * senders.len());
    for message in messages {
        for sender in senders {
            if let Some(seed) = seeds.choose(rng) {
                plan.push(send(sender, seed, message, MessageCategory::Warmup));
            }
        }
    }
    plan
}

/// Per spam sender: one random template to `recipients` distinct seeds
/// (fewer when the seed list is shorter).
pub fn plan_spam<R: Rng + ?Sized>(
    senders: &[String],
    messages: &[TemplateMessage],
    seeds: &[String],
    recipients: usize,
    rng: &mut R,
) -> Vec<SendRequest> {
    let mut plan = Vec::new();
    for sender in senders {
        let Some(message) = messages.choose(rng) else {
            break;
        };
        let take = recipients.min(seeds.len());
        for seed in seeds.choose_multiple(rng, take) {
            plan.push(send(sender, seed, message, MessageCategory::Spam));
        }
    }
    plan
}

/// Per burned sender: `per_sender` sends, each with a random template and seed.
pub fn plan_burned<R: Rng + ?Sized>(
    senders: &[String],
    messages: &[TemplateMessage],
    seeds: &[String],
    per_sender: usize,
    rng: &mut R,
) -> Vec<SendRequest> {
    let mut plan = Vec::with_capacity(senders.len() * per_sender);
    for sender in senders {
        for _ in 0..per_sender {
            if let (Some(message), Some(seed)) = (messages.choose(rng), seeds.choose(rng)) {
                plan.push(send(sender, seed, message, MessageCategory::Warmup));
            }
        }
    }
    plan
}

/// 0 on even days of the month, 1 on odd days.
pub fn day_parity(date: NaiveDate) -> i64 {
    i64::from(date.day() % 2)
}

/// Groups `accounts` by domain, keeping only domains whose id has `parity`.
/// Domains come back in first-seen order.
pub fn group_by_domain(accounts: &[AccountRow], parity: i64) -> Vec<(i64, Vec<String>)> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<(i64, Vec<String>)> = Vec::new();
    for account in accounts.iter().filter(|a| a.domain_id.rem_euclid(2) == parity) {
        let slot = *index.entry(account.domain_id).or_insert_with(|| {
            groups.push((account.domain_id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(account.email_account.clone());
    }
    groups
}

/// Per domain (in random order): one random template and `per_domain`
/// recipients, sent from every account of the domain to each recipient.
pub fn plan_domains<R: Rng + ?Sized>(
    accounts: &[AccountRow],
    messages: &[TemplateMessage],
    seeds: &[String],
    per_domain: usize,
    parity: i64,
    rng: &mut R,
) -> Vec<SendRequest> {
    let mut groups = group_by_domain(accounts, parity);
    groups.shuffle(rng);
    tracing::info!(
        "Planning across {} accounts in {} domains.",
        groups.iter().map(|(_, a)| a.len()).sum::<usize>(),
        groups.len()
    );

    let mut plan = Vec::new();
    for (_, domain_accounts) in &groups {
        let Some(message) = messages.choose(rng) else {
            break;
        };
        let recipients = pick_recipients(seeds, per_domain, rng);
        for sender in domain_accounts {
            for recipient in &recipients {
                plan.push(send(sender, recipient, message, MessageCategory::Warmup));
            }
        }
    }
    plan
}
