//! Terminal presentation of a session.

use std::io::{self, Write};

use parley_core::{Identity, IdentityOrigin, Speaker};
use parley_session::{SessionConfig, SessionSnapshot};

/// Prints transcript turns as they appear, remembering how many it has shown.
#[derive(Debug, Default)]
pub struct Renderer {
    rendered: usize,
}

#[allow(clippy::unused_self)]
impl Renderer {
    pub const fn new() -> Self {
        Self { rendered: 0 }
    }

    pub fn header(&self, config: &SessionConfig) {
        println!("💬 parley");
        println!("   endpoint: {}", config.service_endpoint);
        println!("   Type 'exit' or 'quit' to end the conversation.");
        println!();
    }

    pub fn prompt(&self) -> io::Result<()> {
        print!("> ");
        io::stdout().flush()
    }

    pub fn thinking(&self) -> io::Result<()> {
        print!("… ");
        io::stdout().flush()
    }

    pub fn notice(&self, text: &str) {
        println!("   ({text})");
    }

    pub fn identity(&self, identity: &Identity) {
        let origin = match identity.origin() {
            IdentityOrigin::Remote => "signed in",
            IdentityOrigin::Local => "anonymous",
        };
        println!(
            "   identity: {} ({origin} at {})",
            identity.id(),
            identity.established_at().format("%H:%M:%S UTC")
        );
    }

    /// Mark everything in `snapshot` as already on screen.
    pub fn skip_to(&mut self, snapshot: &SessionSnapshot) {
        self.rendered = snapshot.transcript.len();
    }

    /// Print model turns appended since the last call.
    pub fn render_new(&mut self, snapshot: &SessionSnapshot) {
        let turns = snapshot.transcript.turns();
        for turn in turns.iter().skip(self.rendered) {
            if turn.role() == Speaker::Model {
                println!();
                println!("{}", turn.text());
                println!();
            }
        }
        self.rendered = turns.len();
    }

    pub fn summary(&self, snapshot: &SessionSnapshot) {
        let stats = snapshot.transcript.stats();
        let elapsed = snapshot.updated_at - snapshot.created_at;
        println!();
        println!(
            "👋 {} exchanges, {} characters, {}s",
            snapshot.completed_exchanges(),
            stats.total_characters,
            elapsed.num_seconds()
        );
    }
}
