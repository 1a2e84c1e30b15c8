use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use shard_common::EngineApi;
use shard_facade::ShardFacade;
use shard_storage::EngineOptions;

/// `shard demo [path]` runs a scripted walkthrough of insert/select/update/
/// delete/rollback; `shard repl [path]` opens an interactive session.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") => run_demo(args.next().map(PathBuf::from)).await,
        Some("repl") => run_repl(args.next().map(PathBuf::from)).await,
        _ => {
            eprintln!("usage: shard <demo|repl> [data-file-path]");
            std::process::exit(2);
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("shard-demo.db")
}

async fn run_demo(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(default_path);
    let _ = std::fs::remove_file(&path);
    println!("=== shard demo ({}) ===", path.display());

    let mut opts = EngineOptions::default();
    opts.wal_path = Some(path.with_extension("wal"));
    let facade = ShardFacade::open(&path, opts)?;

    let pk_a = facade.insert(b"alpha".to_vec(), None).await?;
    let pk_b = facade.insert(b"beta".to_vec(), None).await?;
    println!("inserted pk={pk_a} -> \"alpha\", pk={pk_b} -> \"beta\"");

    let tx = facade.begin_tx().await?;
    facade.update(pk_a, b"alpha-v2".to_vec(), Some(tx)).await?;
    facade.delete(pk_b, Some(tx)).await?;
    println!("in transaction {tx}: updated pk={pk_a}, deleted pk={pk_b} (not yet visible)");
    println!(
        "  outside the tx: select(pk={pk_a}) = {:?}",
        facade.select(pk_a, None).await?
    );
    facade.commit(tx).await?;
    println!("committed tx {tx}");

    println!("  select(pk={pk_a}) = {:?}", facade.select(pk_a, None).await?);
    println!("  select(pk={pk_b}) = {:?}", facade.select(pk_b, None).await?);

    let meta = facade.metadata(None).await?;
    println!("metadata: {meta}");

    facade.close().await?;
    Ok(())
}

async fn run_repl(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(default_path);
    let mut opts = EngineOptions::default();
    opts.wal_path = Some(path.with_extension("wal"));
    let facade = ShardFacade::open(&path, opts)?;

    println!("shard repl — {}", path.display());
    println!("commands: insert <text> | select <pk> | update <pk> <text> | delete <pk>");
    println!("          begin | commit <tx> | rollback <tx> | metadata | quit");

    let stdin = io::stdin();
    let mut tx: Option<u64> = None;
    loop {
        print!("shard{}> ", tx.map(|t| format!("[tx {t}]")).unwrap_or_default());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        match parts.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] => break,
            ["insert", rest @ ..] => {
                let pk = facade.insert(rest.join(" ").into_bytes(), tx).await?;
                println!("pk = {pk}");
            }
            ["select", pk] => {
                let pk: u64 = pk.parse()?;
                match facade.select(pk, tx).await? {
                    Some(bytes) => println!("{:?}", String::from_utf8_lossy(&bytes)),
                    None => println!("null"),
                }
            }
            ["update", pk, rest @ ..] => {
                let pk: u64 = pk.parse()?;
                facade.update(pk, rest.join(" ").into_bytes(), tx).await?;
                println!("ok");
            }
            ["delete", pk] => {
                let pk: u64 = pk.parse()?;
                facade.delete(pk, tx).await?;
                println!("ok");
            }
            ["begin"] => {
                let id = facade.begin_tx().await?;
                tx = Some(id);
                println!("tx = {id}");
            }
            ["commit", id] => {
                facade.commit(id.parse()?).await?;
                tx = None;
                println!("ok");
            }
            ["rollback", id] => {
                facade.rollback(id.parse()?).await?;
                tx = None;
                println!("ok");
            }
            ["metadata"] => println!("{}", facade.metadata(tx).await?),
            other => eprintln!("unrecognized command: {other:?}"),
        }
    }

    if tx.is_none() {
        facade.close().await?;
    }
    Ok(())
}
