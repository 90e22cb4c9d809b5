use anyhow::Result;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::{Clock, Message, SyncConfig, SyncHealth, Synchronizer};
use crate::store::{AppwriteClient, Identity, Session};

const MAX_STATUS_MESSAGES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub input: String,
    // In characters, not bytes.
    pub cursor_position: usize,
    // Lines scrolled back from the newest message.
    pub scroll_offset: usize,

    pub identity: Identity,
    pub sync: Synchronizer,
    pub offline: bool,
    pub status_messages: Vec<String>,

    // Only set for hosted sessions, used to end the session on /logout.
    account_client: Option<AppwriteClient>,
    status_rx: mpsc::UnboundedReceiver<String>,
}

impl App {
    pub fn new(
        session: Session,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        account_client: Option<AppwriteClient>,
    ) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let identity = session.identity.clone();
        let offline = account_client.is_none();
        let mut sync = Synchronizer::new(session, clock, config, status_tx);
        sync.initialize();

        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            input: String::new(),
            cursor_position: 0,
            scroll_offset: 0,

            identity,
            sync,
            offline,
            status_messages: Vec::new(),

            account_client,
            status_rx,
        };

        app.add_status_message(format!(
            "Draconic Chat - signed in as {} ({})",
            app.identity.display_name(),
            if app.offline { "offline guest" } else { "hosted" }
        ));
        app.add_status_message(format!(
            "Polling every {}s, keeping the last {} messages. Type /help for commands.",
            config.poll_interval.as_secs(),
            config.history_limit
        ));

        app
    }

    pub async fn handle_input(&mut self, event: Event) -> Result<()> {
        if let Event::Key(key) = event {
            if key.kind == KeyEventKind::Press {
                self.handle_key_event(key).await?;
            }
        }
        Ok(())
    }

    async fn handle_key_event(&mut self, key: KeyEvent) -> Result<()> {
        match self.input_mode {
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                KeyCode::Char('i') | KeyCode::Enter => {
                    self.input_mode = InputMode::Editing;
                }
                KeyCode::Up => {
                    self.scroll_back(1);
                }
                KeyCode::Down => {
                    self.scroll_offset = self.scroll_offset.saturating_sub(1);
                }
                KeyCode::PageUp => {
                    self.scroll_back(10);
                }
                KeyCode::PageDown => {
                    self.scroll_offset = self.scroll_offset.saturating_sub(10);
                }
                KeyCode::End => {
                    self.scroll_offset = 0;
                }
                _ => {}
            },
            InputMode::Editing => match key.code {
                KeyCode::Enter => {
                    // The buffer is cleared before the store has answered.
                    let input = std::mem::take(&mut self.input);
                    self.cursor_position = 0;
                    self.submit_input(&input).await?;
                }
                KeyCode::Char(c) => {
                    let at = self.byte_index();
                    self.input.insert(at, c);
                    self.cursor_position += 1;
                }
                KeyCode::Backspace => {
                    if self.cursor_position > 0 {
                        self.cursor_position -= 1;
                        let at = self.byte_index();
                        self.input.remove(at);
                    }
                }
                KeyCode::Delete => {
                    if self.cursor_position < self.input_len() {
                        let at = self.byte_index();
                        self.input.remove(at);
                    }
                }
                KeyCode::Left => {
                    self.cursor_position = self.cursor_position.saturating_sub(1);
                }
                KeyCode::Right => {
                    if self.cursor_position < self.input_len() {
                        self.cursor_position += 1;
                    }
                }
                KeyCode::Home => {
                    self.cursor_position = 0;
                }
                KeyCode::End => {
                    self.cursor_position = self.input_len();
                }
                KeyCode::Esc => {
                    self.input_mode = InputMode::Normal;
                }
                _ => {}
            },
        }
        Ok(())
    }

    // The oldest message always stays on screen.
    fn scroll_back(&mut self, lines: usize) {
        let max = self.sync.messages().len().saturating_sub(1);
        self.scroll_offset = (self.scroll_offset + lines).min(max);
    }

    fn input_len(&self) -> usize {
        self.input.chars().count()
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    async fn submit_input(&mut self, input: &str) -> Result<()> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        if input.starts_with('/') {
            self.handle_command(input).await?;
        } else if self.sync.send(input).is_some() {
            // Jump back to the newest message so the pending one is visible.
            self.scroll_offset = 0;
        } else {
            self.add_status_message("Not connected; message was not sent.".to_string());
        }

        Ok(())
    }

    async fn handle_command(&mut self, input: &str) -> Result<()> {
        let parts: Vec<&str> = input[1..].split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        match parts[0].to_lowercase().as_str() {
            "refresh" | "r" => {
                self.sync.poll();
                self.add_status_message("Refreshing messages...".to_string());
            }
            "clear" => {
                self.status_messages.clear();
            }
            "whoami" => {
                self.add_status_message(format!(
                    "{} ({})",
                    self.identity.display_name(),
                    self.identity.user_id
                ));
            }
            "logout" => {
                self.logout().await;
            }
            "help" | "h" | "commands" => {
                self.show_help();
            }
            "quit" | "q" | "exit" => {
                self.sync.teardown();
                self.should_quit = true;
            }
            _ => {
                self.add_status_message(format!(
                    "Unknown command: {}. Type /help for available commands.",
                    parts[0]
                ));
            }
        }

        Ok(())
    }

    async fn logout(&mut self) {
        self.sync.teardown();

        if let Some(client) = self.account_client.clone() {
            match Identity::logout(&client).await {
                Ok(()) => tracing::info!(user = %self.identity.user_id, "logged out"),
                Err(e) => {
                    tracing::warn!(error = %e, "logout request failed");
                    self.add_status_message(format!("Logout failed: {}", e));
                }
            }
        }

        self.should_quit = true;
    }

    fn show_help(&mut self) {
        let help_text = [
            "Draconic Chat Commands:",
            "/refresh - Fetch new messages now",
            "/whoami - Show the signed-in account",
            "/clear - Clear this status pane",
            "/logout - Sign out and exit; run the client again to sign in",
            "/help, /commands - Show this help",
            "/quit, /exit - Exit without logging out",
            "",
            "Keyboard Commands:",
            "Esc=normal mode, i or Enter=input mode, q=quit (normal mode)",
            "Up/Down=scroll messages, Page Up/Down=fast scroll, End=newest",
            "Home/End=cursor start/end, Enter=send (input mode)",
        ];

        for line in help_text {
            self.add_status_message(line.to_string());
        }
    }

    pub fn add_status_message(&mut self, message: String) {
        self.status_messages.push(format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            message
        ));

        if self.status_messages.len() > MAX_STATUS_MESSAGES {
            self.status_messages.remove(0);
        }
    }

    pub fn on_tick(&mut self) {
        self.sync.process_events();

        while let Ok(status) = self.status_rx.try_recv() {
            self.add_status_message(status);
        }
    }

    pub fn health(&self) -> SyncHealth {
        self.sync.health()
    }

    /// The `height` messages that fit on screen, honoring scroll-back.
    pub fn get_visible_messages(&self, height: usize) -> Vec<&Message> {
        let messages = self.sync.messages();
        let end = messages.len().saturating_sub(self.scroll_offset);
        let start = end.saturating_sub(height);
        messages[start..end].iter().collect()
    }

    pub fn get_visible_status_messages(&self, height: usize) -> Vec<&String> {
        let start = self.status_messages.len().saturating_sub(height);
        self.status_messages[start..].iter().collect()
    }
}
