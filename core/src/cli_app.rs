/// Terminal client for the chat API, shared logic for the `qm` binary.
///
/// Talks to a running quadmart service over HTTP:
///   QUADMART_API    base URL (default http://127.0.0.1:5000)
///   QUADMART_TOKEN  bearer token (required)
use crate::chat_types::ms_to_rfc3339;
use colored::*;
use futures_util::StreamExt;

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("qm")
        .to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let command = &args[1];

    match command.as_str() {
        "start" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} start <listing_id>", bin).yellow());
                return Ok(());
            }
            start_conversation(&args[2]).await?;
        }
        "ls" => {
            list_conversations().await?;
        }
        "open" => {
            if args.len() < 3 {
                eprintln!("{}", format!("Usage: {} open <conversation_id>", bin).yellow());
                return Ok(());
            }
            open_conversation(&args[2]).await?;
        }
        "send" => {
            if args.len() < 4 {
                eprintln!(
                    "{}",
                    format!("Usage: {} send <conversation_id> <message>", bin).yellow()
                );
                return Ok(());
            }
            let content = args[3..].join(" ");
            send_message(&args[2], &content).await?;
        }
        "unread" => {
            show_unread().await?;
        }
        "watch" => {
            watch_events().await?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "🛒 Quadmart Chat CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!(
        "  {} <listing_id>               Open (or resume) a conversation with the seller",
        "start".cyan()
    );
    println!(
        "  {}                            List your conversations",
        "ls".cyan()
    );
    println!(
        "  {} <conversation_id>           Show a conversation (marks it read)",
        "open".cyan()
    );
    println!(
        "  {} <conversation_id> <message> Send a message",
        "send".cyan()
    );
    println!(
        "  {}                        Unread conversation count",
        "unread".cyan()
    );
    println!(
        "  {}                         Tail the live change feed",
        "watch".cyan()
    );
    println!();
    println!("{}", "Environment:".bright_white().bold());
    println!(
        "  {}    base URL (default http://127.0.0.1:5000)",
        "QUADMART_API".cyan()
    );
    println!("  {}  bearer token (required)", "QUADMART_TOKEN".cyan());
}

fn api_base() -> String {
    std::env::var("QUADMART_API").unwrap_or_else(|_| "http://127.0.0.1:5000".to_string())
}

fn token() -> String {
    match std::env::var("QUADMART_TOKEN") {
        Ok(t) if !t.is_empty() => t,
        _ => {
            eprintln!("{}", "✗ Error: QUADMART_TOKEN is not set".red().bold());
            eprintln!(
                "  Start the service with {} and export one of the announced tokens.",
                "--seed-demo".yellow()
            );
            std::process::exit(1);
        }
    }
}

async fn api_get(path: &str) -> anyhow::Result<(reqwest::StatusCode, serde_json::Value)> {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", api_base(), path))
        .bearer_auth(token())
        .send()
        .await?;
    let status = resp.status();
    let value = resp.json::<serde_json::Value>().await?;
    Ok((status, value))
}

async fn api_post(
    path: &str,
    body: serde_json::Value,
) -> anyhow::Result<(reqwest::StatusCode, serde_json::Value)> {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", api_base(), path))
        .bearer_auth(token())
        .json(&body)
        .send()
        .await?;
    let status = resp.status();
    let value = resp.json::<serde_json::Value>().await?;
    Ok((status, value))
}

fn bail_on_error(status: reqwest::StatusCode, value: &serde_json::Value) {
    if !status.is_success() {
        let error = value["error"].as_str().unwrap_or("Unknown error");
        eprintln!("{} Error: {}", "✗".red().bold(), error.red());
        std::process::exit(1);
    }
}

async fn start_conversation(listing_id: &str) -> anyhow::Result<()> {
    let (status, resp) = api_post(
        "/api/conversations",
        serde_json::json!({ "listing_id": listing_id }),
    )
    .await?;
    bail_on_error(status, &resp);

    let conv = &resp["conversation"];
    let id = conv["id"].as_str().unwrap_or("?");
    let title = conv["listing"]["title"].as_str().unwrap_or("(listing gone)");
    if status == reqwest::StatusCode::CREATED {
        println!(
            "{} Conversation opened on {}",
            "✓".green().bold(),
            title.cyan()
        );
    } else {
        println!(
            "{} Resuming conversation on {}",
            "✓".green().bold(),
            title.cyan()
        );
    }
    println!("  id: {}", id.cyan());
    Ok(())
}

async fn list_conversations() -> anyhow::Result<()> {
    let (status, resp) = api_get("/api/conversations").await?;
    bail_on_error(status, &resp);

    let convs = resp["conversations"].as_array().cloned().unwrap_or_default();
    if convs.is_empty() {
        println!("{}", "No conversations yet".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Conversations ({})", convs.len())
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for conv in convs {
        let id = conv["id"].as_str().unwrap_or("?");
        let title = conv["listing"]["title"].as_str().unwrap_or("(listing gone)");
        let buyer = conv["buyer"]["full_name"].as_str().unwrap_or("?");
        let seller = conv["seller"]["full_name"].as_str().unwrap_or("?");
        let preview = conv["last_message"]["content"].as_str().unwrap_or("");
        let at = conv["last_message_at"].as_i64().unwrap_or(0);

        println!("  {} {}", title.cyan().bold(), format!("[{}]", id).dimmed());
        println!(
            "    {} ↔ {} │ {} {}",
            buyer.green(),
            seller.magenta(),
            preview,
            format!("({})", ms_to_rfc3339(at)).dimmed()
        );
    }
    Ok(())
}

async fn open_conversation(conversation_id: &str) -> anyhow::Result<()> {
    let (status, resp) = api_get(&format!("/api/conversations/{}", conversation_id)).await?;
    bail_on_error(status, &resp);

    let conv = &resp["conversation"];
    let title = conv["listing"]["title"].as_str().unwrap_or("(listing gone)");
    let buyer_id = conv["buyer_id"].as_str().unwrap_or("");

    println!("{}", title.bright_cyan().bold());
    println!("{}", "─".repeat(60).dimmed());

    let messages = resp["messages"].as_array().cloned().unwrap_or_default();
    if messages.is_empty() {
        println!("{}", "No messages yet".yellow());
        return Ok(());
    }
    for msg in messages {
        let sender = msg["sender_id"].as_str().unwrap_or("?");
        let content = msg["content"].as_str().unwrap_or("");
        let at = msg["created_at"].as_i64().unwrap_or(0);
        let read = msg["is_read"].as_bool().unwrap_or(false);

        let who = if sender == buyer_id {
            sender.green()
        } else {
            sender.magenta()
        };
        let mark = if read { "✓".dimmed() } else { "•".yellow() };
        println!(
            "  {} [{}] {}: {}",
            mark,
            ms_to_rfc3339(at).dimmed(),
            who,
            content
        );
    }
    Ok(())
}

async fn send_message(conversation_id: &str, content: &str) -> anyhow::Result<()> {
    let (status, resp) = api_post(
        "/api/send",
        serde_json::json!({ "conversation_id": conversation_id, "content": content }),
    )
    .await?;
    bail_on_error(status, &resp);

    let id = resp["message"]["id"].as_str().unwrap_or("?");
    println!("{} Message sent! ID: {}", "✓".green().bold(), id.cyan());
    Ok(())
}

async fn show_unread() -> anyhow::Result<()> {
    let (status, resp) = api_get("/api/unread-count").await?;
    bail_on_error(status, &resp);

    let n = resp["unread_count"].as_u64().unwrap_or(0);
    if n == 0 {
        println!("{}", "No unread conversations".dimmed());
    } else {
        println!(
            "{} {} unread conversation{}",
            "●".yellow().bold(),
            n.to_string().bright_white().bold(),
            if n == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// Tail /events and print each change as it arrives. Runs until killed.
async fn watch_events() -> anyhow::Result<()> {
    let resp = reqwest::Client::new()
        .get(format!("{}/events", api_base()))
        .bearer_auth(token())
        .send()
        .await?;
    if !resp.status().is_success() {
        eprintln!(
            "{} Error: events stream returned {}",
            "✗".red().bold(),
            resp.status()
        );
        std::process::exit(1);
    }

    println!("{}", "Watching the change feed (ctrl-c to stop)...".dimmed());
    let mut stream = resp.bytes_stream();
    let mut buf = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.push_str(&String::from_utf8_lossy(&chunk));

        // SSE frames are separated by a blank line
        while let Some(pos) = buf.find("\n\n") {
            let frame = buf[..pos].to_string();
            buf.drain(..pos + 2);
            for line in frame.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    print_change(data);
                }
            }
        }
    }
    Ok(())
}

fn print_change(data: &str) {
    let v: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return,
    };
    let op = v["op"].as_str().unwrap_or("?");
    let msg = &v["message"];
    let conv = msg["conversation_id"].as_str().unwrap_or("?");
    let sender = msg["sender_id"].as_str().unwrap_or("?");
    let content = msg["content"].as_str().unwrap_or("");

    match op {
        "insert" => println!(
            "{} {} {} in {}: {}",
            "✉".bright_cyan(),
            "new".green().bold(),
            sender.cyan(),
            conv.dimmed(),
            content
        ),
        "update" => println!(
            "{} {} message from {} in {}",
            "✓".dimmed(),
            "read".dimmed(),
            sender.cyan(),
            conv.dimmed()
        ),
        _ => {}
    }
}
