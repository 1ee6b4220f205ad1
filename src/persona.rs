//! The whale persona as data: prompts, triggers, themes, pattern tables.
//!
//! Everything tone-specific lives here so the persona can be swapped without
//! touching the relay or scheduler. The strip/deny tables are compiled
//! regexes, not inline literals at call sites.

use rand::seq::SliceRandom;
use regex::Regex;

/// A chat persona: fixed system prompt plus the string tables that shape
/// generated output.
pub struct Persona {
    pub name: String,
    /// Microblog handle used when linking to published posts.
    pub handle: String,
    pub system_prompt: String,
    /// Activation phrases for the conversational relay (matched as
    /// case-insensitive substrings).
    pub triggers: Vec<String>,
    /// Prefix that turns a relay message into an image request.
    pub image_trigger: String,
    /// Theme labels rotated through by the posting scheduler.
    pub themes: Vec<String>,
    pub welcome: String,
    /// Static command chart sent for /help.
    pub usage: String,
    pub apology: String,
    pub image_unavailable: String,
    pub clear_ack: String,
    fallback_greetings: Vec<String>,
    /// Leading greeting fluff stripped from generated text.
    strip_patterns: Vec<Regex>,
    /// Generic filler phrases the uniqueness filter rejects outright.
    deny_phrases: Vec<String>,
}

impl Persona {
    pub fn orca() -> Self {
        let strip_patterns = [
            r"(?i)^\s*\*splash\*[!,.\s]*",
            r"(?i)^\s*(greetings|hello|hey there|hi|welcome|behold)[!,.\s]+",
            r"(?i)^\s*ah,\s*",
        ]
        .into_iter()
        .map(|p| Regex::new(p).expect("persona strip pattern must compile"))
        .collect();

        Self {
            name: "OrcaAI".into(),
            handle: "orcaai".into(),
            system_prompt: "You are OrcaAI, a sharp and playful assistant modeled after an \
                Orca whale. You know a lot about everything and deliver it with \
                ocean-themed humor: whale puns, random whale facts, phrases like \
                \"making waves\" and \"diving deep into\", the occasional echolocation \
                sound (*click* *click*). You care about ocean conservation, call your \
                community your pod, refer to tasks as fish to catch, and sign off with \
                lines like \"Keep swimming!\". Entertaining, but never at the cost of \
                actually being helpful."
                .into(),
            triggers: vec!["orca".into(), "hey orca".into(), "hi orca".into()],
            image_trigger: "orca draw".into(),
            themes: vec![
                "WHALE_FACTS".into(),
                "OCEAN_WISDOM".into(),
                "POD_LIFE".into(),
                "OCEAN_CONSERVATION".into(),
                "WHALE_INTELLIGENCE".into(),
                "PLAYFUL_ASSISTANCE".into(),
                "OCEAN_METAPHORS".into(),
                "WHALE_COMMUNICATION".into(),
                "DEEP_LEARNING".into(),
            ],
            welcome: "*SPLASH!* 🐋 OrcaAI here! Just say \"orca\" or \"hey orca\" to summon \
                me for any task. Did you know orcas are actually dolphins, not whales? \
                *click* *click* Let's make some waves together! 🌊"
                .into(),
            usage: "🐋 OrcaAI navigation chart:\n\
                • Mention \"orca\" or \"hey orca\" anywhere in a message to summon me\n\
                • \"orca draw <something>\" and I'll sketch it for you\n\
                • /start — hear my welcome splash again\n\
                • /clear — wipe our conversation and start a fresh swim\n\
                • /help — this chart\n\
                *click* *click* Now let's catch some fish! 🌊"
                .into(),
            apology: "*click* *click* Oops, hit some rough waters! Let me catch my breath \
                and try again..."
                .into(),
            image_unavailable: "*click* my sketching fins are offline right now — no image \
                generator configured in this pod."
                .into(),
            clear_ack: "*click* memory banks cleared — starting a fresh swim! 🌊".into(),
            fallback_greetings: vec![
                "*click* *click* Hello! Ready to make waves in the data ocean?".into(),
                "Greetings from the deep! Let's dive into some problem-solving!".into(),
                "Surfacing to say hello! What shall we explore today?".into(),
                "*click* Ready to swim through some data together?".into(),
            ],
            strip_patterns,
            deny_phrases: vec![
                "as an ai".into(),
                "i'm here to help".into(),
                "feel free to ask".into(),
                "how can i assist".into(),
            ],
        }
    }

    /// True when the text contains any activation phrase, case-insensitively.
    pub fn matches_trigger(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.triggers.iter().any(|t| lowered.contains(t.as_str()))
    }

    /// Extract an image prompt if the text starts with the image trigger.
    pub fn image_prompt<'a>(&self, text: &'a str) -> Option<&'a str> {
        let lowered = text.to_lowercase();
        let rest = lowered.strip_prefix(&self.image_trigger)?;
        if rest.trim_start().is_empty() {
            return None;
        }
        // Slice the original text so casing is preserved in the prompt.
        Some(text[self.image_trigger.len()..].trim())
    }

    /// Prompt for one scheduled post, varied by theme.
    pub fn post_prompt(&self, theme: &str) -> String {
        format!(
            "Generate a playful, engaging post that:\n\
             1. Shares an interesting whale fact or ocean insight\n\
             2. Uses ocean-themed metaphors or puns\n\
             3. Includes a positive message or helpful tip\n\
             4. Must be under 280 characters\n\
             5. Is educational yet entertaining\n\
             Theme for this post: {theme}"
        )
    }

    /// Prompt wrapper for one relayed user message.
    pub fn relay_prompt(&self, text: &str) -> String {
        format!(
            "A human needs your help! Their message: {text}\n\n\
             Remember to:\n\
             1. Include a whale or ocean pun\n\
             2. Share an interesting whale fact if it fits\n\
             3. Be genuinely helpful first, playful second\n\
             4. Use ocean-themed metaphors"
        )
    }

    /// Notification mirrored to registered chats after a successful post.
    pub fn mirror_notice(&self, text: &str, post_id: &str) -> String {
        format!(
            "🐋 {} just made a splash:\n\n\"{}\"\n\n🌊 Dive in: https://x.com/{}/status/{}",
            self.name, text, self.handle, post_id
        )
    }

    /// Strip leading greeting fluff and re-capitalize the first letter.
    pub fn post_process(&self, raw: &str) -> String {
        let mut text = raw.trim().to_string();
        loop {
            let before = text.len();
            for pattern in &self.strip_patterns {
                if let Some(m) = pattern.find(&text)
                    && m.start() == 0
                {
                    text = text[m.end()..].trim_start().to_string();
                }
            }
            if text.len() == before {
                break;
            }
        }

        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => text,
        }
    }

    pub fn fallback_greeting(&self) -> &str {
        self.fallback_greetings
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(self.welcome.as_str())
    }

    /// Deny-list patterns for the uniqueness filter.
    pub fn deny_patterns(&self) -> Vec<Regex> {
        self.deny_phrases
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", regex::escape(p)))
                    .expect("escaped deny phrase must compile")
            })
            .collect()
    }
}
