use anyhow::{anyhow, Context, Result};
use rand::{thread_rng, Rng};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::AppwriteClient;
use crate::chat::OwnerRef;

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: OwnerRef,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_guest: bool,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(rename = "$id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

impl Identity {
    /// Local-only identity for offline mode (new id and nickname each run)
    pub fn guest() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            user_id: OwnerRef::new(format!("guest-{}", &id[..12])),
            name: Some(generate_guest_nickname()),
            email: None,
            is_guest: true,
        }
    }

    /// Open an email/password session and load the account behind it
    pub async fn login(client: &AppwriteClient, email: &str, password: &str) -> Result<Self> {
        let request = client
            .request(Method::POST, "/account/sessions/email")
            .json(&json!({ "email": email, "password": password }));
        client
            .send_json::<serde_json::Value>(request)
            .await
            .with_context(|| format!("Login failed for {}", email))?;

        Self::current(client).await
    }

    /// Create the account, then log in with it
    pub async fn register(
        client: &AppwriteClient,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Self> {
        let request = client.request(Method::POST, "/account").json(&json!({
            "userId": "unique()",
            "email": email,
            "password": password,
            "name": name,
        }));
        client
            .send_json::<serde_json::Value>(request)
            .await
            .with_context(|| format!("Registration failed for {}", email))?;

        Self::login(client, email, password).await
    }

    pub async fn logout(client: &AppwriteClient) -> Result<()> {
        let request = client.request(Method::DELETE, "/account/sessions/current");
        client.send_empty(request).await.context("Logout failed")?;
        Ok(())
    }

    async fn current(client: &AppwriteClient) -> Result<Self> {
        let request = client.request(Method::GET, "/account");
        let account: Account = client
            .send_json(request)
            .await
            .context("Could not load the logged-in account")?;

        if account.id.is_empty() {
            return Err(anyhow!("Account response had no id"));
        }

        Ok(Self {
            user_id: OwnerRef::new(account.id),
            name: non_empty(account.name),
            email: non_empty(account.email),
            is_guest: false,
        })
    }

    /// Name, else email, else "You"
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("You")
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Format: {adjective}{noun}{number}
fn generate_guest_nickname() -> String {
    let adjectives = [
        "ember", "ashen", "molten", "scaled", "horned", "gilded", "smoky", "feral",
        "ancient", "crimson", "onyx", "storm", "frost", "brass", "copper", "venom",
    ];

    let nouns = [
        "wyrm", "drake", "wyvern", "hoard", "claw", "fang", "wing", "scale",
        "egg", "lair", "cinder", "spire", "talon", "tail", "horn", "flame",
    ];

    let mut rng = thread_rng();
    let adjective = adjectives[rng.gen_range(0..adjectives.len())];
    let noun = nouns[rng.gen_range(0..nouns.len())];
    let number: u16 = rng.gen_range(100..9999);

    format!("{}{}{}", adjective, noun, number)
}
