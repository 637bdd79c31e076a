//! Connects to one conversation, sends a message and prints the streamed reply.
//!
//! ```text
//! MENTORLINK_HOST=localhost:8000 MENTORLINK_TOKEN=... \
//!     cargo run --example chat_session -- <conversation-id> "How do I start a budget?"
//! ```

use mentorlink::{
    ChannelIdentity, ConnectionStatus, Credential, LinkBuilder, LinkConfig, Result,
};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let host = env::var("MENTORLINK_HOST").unwrap_or_else(|_| "localhost:8000".to_string());
    let token = env::var("MENTORLINK_TOKEN").unwrap_or_default();
    let mut args = env::args().skip(1);
    let conversation = args.next().unwrap_or_else(|| "1".to_string());
    let text = args.next().unwrap_or_else(|| "Hello".to_string());

    let config = LinkConfig::builder()
        .host(&host)
        .use_tls(!host.starts_with("localhost"))
        .build();

    let mut link = LinkBuilder::new(Credential::new(token)).config(config).spawn();
    let mut celebrations = link.subscribe_gamification();
    tokio::spawn(async move {
        while let Ok(update) = celebrations.recv().await {
            println!("* {:?}: {}", update.kind, update.title.unwrap_or_default());
        }
    });

    link.select_channel(Some(ChannelIdentity::conversation(conversation)))?;
    let ready = link
        .wait_for(|s| matches!(s.status, ConnectionStatus::Open | ConnectionStatus::Error))
        .await?;
    if let Some(fault) = ready.error.filter(|f| f.is_fatal()) {
        eprintln!("cannot connect: {}", fault.message);
        return Ok(());
    }

    let sent = link.send(text).await?;
    println!("> {} ({})", sent.content, sent.id);

    let mut printed = 0;
    loop {
        let snapshot = match tokio::time::timeout(Duration::from_secs(60), link.changed()).await {
            Ok(result) => result?,
            Err(_) => break,
        };

        if let Some(agent) = &snapshot.active_agent {
            if printed == 0 {
                println!("[{} is answering]", agent);
            }
        }
        match &snapshot.streaming_text {
            Some(text) if text.len() > printed => {
                print!("{}", &text[printed..]);
                printed = text.len();
            }
            None if printed > 0 => {
                println!();
                break;
            }
            _ => {}
        }
        if let Some(err) = &snapshot.last_stream_error {
            eprintln!("reply failed: {}", err);
            break;
        }
    }

    link.shutdown();
    Ok(())
}
