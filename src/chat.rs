//! Question answering from the command line.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::chunk::truncate_chars;
use crate::rag::{answer, Answer};
use crate::session::Session;

fn print_answer(answer: &Answer, show_sources: bool) {
    println!("{}", answer.text.trim_end());
    if show_sources && !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, s) in answer.sources.iter().enumerate() {
            let location = s
                .chunk
                .location
                .map(|l| format!(" #{}", l))
                .unwrap_or_default();
            println!(
                "  {}. {}{} [{}] score {:.3}",
                i + 1,
                s.chunk.source,
                location,
                s.chunk.kind,
                s.score
            );
        }
    }
}

/// `pth ask <question>`
pub async fn run_ask(session: &Session, question: &str, show_sources: bool) -> Result<()> {
    let retriever = session.general_retriever().await?;
    let answer = answer(&session.memory, &retriever, question).await?;
    print_answer(&answer, show_sources);
    Ok(())
}

/// `pth chat`: one question per line until EOF or `exit`. A failed
/// question prints the error and the loop continues.
pub async fn run_chat(session: &Session, show_sources: bool) -> Result<()> {
    let retriever = session.general_retriever().await?;
    if retriever.namespace().is_none() {
        eprintln!("No documents indexed yet; answers will have no document context.");
    }
    eprintln!("Ask about your documents. Type 'exit' to quit.");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        match answer(&session.memory, &retriever, question).await {
            Ok(a) => print_answer(&a, show_sources),
            Err(e) => eprintln!("Error: {:#}", e),
        }
        println!();
    }
    Ok(())
}

/// `pth retrieve <query>`
pub async fn run_retrieve(session: &Session, query: &str, claims: bool, k: Option<usize>) -> Result<()> {
    let base = if claims {
        &session.config.retrieval.claims_namespace
    } else {
        &session.config.retrieval.general_namespace
    };
    let k = k.unwrap_or(session.config.retrieval.top_k);
    let retriever = session.index.retriever(base, k).await?;
    let Some(ns) = retriever.namespace().cloned() else {
        println!("Nothing indexed under '{}'.", base);
        return Ok(());
    };
    let results = retriever.retrieve(query).await?;
    println!("namespace: {}", ns);
    println!("results: {}", results.len());
    for (i, r) in results.iter().enumerate() {
        println!();
        println!(
            "{}. {} {} [{}] score {:.3}",
            i + 1,
            r.chunk.source,
            r.chunk
                .location
                .map(|l| format!("#{}", l))
                .unwrap_or_default(),
            r.chunk.kind,
            r.score
        );
        println!("   {}", truncate_chars(&r.chunk.text, 240).replace('\n', " "));
    }
    Ok(())
}
