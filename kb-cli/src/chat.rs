use anyhow::Result;
use kb_rag::{KnowledgeBase, RagService};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// Read questions until `exit`, Ctrl-C or Ctrl-D and answer each one.
///
/// A failed answer is printed and the loop continues.
pub async fn run(kb: &KnowledgeBase, k: usize, threshold: f32) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Ask about '{}' (k={k}, threshold={threshold}). Type 'exit' to quit.", kb.name());

    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        rl.add_history_entry(question)?;

        match kb.answer_with_sources(question, k, threshold).await {
            Ok(answer) => {
                println!("{}", answer.text);
                println!("({} source chunk(s))", answer.sources.len());
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}
