//! In-process RESP server that replays a fixed script of replies and records
//! every command it receives.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use falkordb_client::{RespCodec, RespValue};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub struct ScriptedServer {
    pub url: String,
    pub port: u16,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedServer {
    /// Accept one connection and answer the n-th command with `replies[n]`.
    /// `None` reads the command but never answers it. The connection is
    /// closed once the script runs out.
    pub async fn start(replies: Vec<Option<RespValue>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, RespCodec::new());
            let mut replies = replies.into_iter();
            while let Some(Ok(frame)) = framed.next().await {
                recorded.lock().unwrap().push(args(&frame));
                match replies.next() {
                    Some(Some(reply)) => {
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Some(None) => {}
                    None => break,
                }
            }
        });

        Self {
            url: format!("falkor://127.0.0.1:{port}"),
            port,
            commands,
        }
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

fn args(frame: &RespValue) -> Vec<String> {
    frame
        .as_array()
        .unwrap_or_default()
        .iter()
        .map(|a| a.as_text().unwrap_or_default().to_string())
        .collect()
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::bulk(s)
}

pub fn int(i: i64) -> RespValue {
    RespValue::Integer(i)
}

pub fn arr(items: Vec<RespValue>) -> RespValue {
    RespValue::Array(items)
}

pub fn error(message: &str) -> RespValue {
    RespValue::Error(message.to_string())
}

/// `[type_tag, payload]`
pub fn cell(tag: i64, payload: RespValue) -> RespValue {
    arr(vec![int(tag), payload])
}

pub fn stats(lines: &[&str]) -> RespValue {
    arr(lines.iter().map(|l| bulk(l)).collect())
}

/// `[header, rows, stats]` with scalar columns.
pub fn table(columns: &[&str], rows: Vec<Vec<RespValue>>) -> RespValue {
    arr(vec![
        arr(columns.iter().map(|c| arr(vec![int(1), bulk(c)])).collect()),
        arr(rows.into_iter().map(arr).collect()),
        stats(&["Cached execution: 0", "Query internal execution time: 0.2 milliseconds"]),
    ])
}

/// `[stats]` acknowledgement of a write.
pub fn ack(lines: &[&str]) -> RespValue {
    arr(vec![stats(lines)])
}

/// Single string column, as returned by `CALL db.labels()` and friends.
pub fn names(column: &str, values: &[&str]) -> RespValue {
    table(
        &[column],
        values.iter().map(|v| vec![cell(2, bulk(v))]).collect(),
    )
}

/// Node cell without properties.
pub fn node(id: i64, labels: &[i64]) -> RespValue {
    cell(
        8,
        arr(vec![int(id), arr(labels.iter().map(|l| int(*l)).collect()), arr(vec![])]),
    )
}
