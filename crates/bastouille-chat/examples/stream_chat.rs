use std::sync::Arc;

use bastouille_chat::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    bastouille_chat::init_observability("info");

    let transport = HttpTransport::from_env()?;
    let store = Arc::new(MemoryStore::new());
    let mut session = ChatSession::open(SessionConfig::named("example"), store)?;

    let outcome = session
        .submit("Que planter au potager en octobre ?")
        .on_update(|_, update| match update {
            FoldUpdate::TranscriptAppended { text, .. } => print!("{text}"),
            FoldUpdate::StateChanged(state) if state.is_terminal() => println!(),
            _ => {}
        })
        .send(&transport)
        .await?;

    for record in session.trace().records() {
        if let TraceEntry::ToolCall { tool, args } = &record.entry {
            eprintln!("tool {tool}: {args}");
        }
    }
    println!("[{:?}]", outcome.state);
    Ok(())
}
