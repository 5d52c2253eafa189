use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, trace};
use zpm_model::{Level, Message};

/// Receives internal-level messages instead of the output channel.
pub type Interceptor = Arc<dyn Fn(&Message) + Send + Sync>;

const BLOCK_END: &str = ":::";

/// Stateful line classifier for one output stream.
#[derive(Debug)]
pub struct Classifier {
    default: Level,
    block: Option<(Level, Vec<String>)>,
}

impl Classifier {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            block: None,
        }
    }

    /// Classifies one line (without its terminator).
    ///
    /// Returns `None` while a multi-line block is being collected.
    pub fn feed(&mut self, line: &str) -> Option<Message> {
        if let Some((level, lines)) = self.block.as_mut() {
            if line == BLOCK_END {
                let level = *level;
                let body = lines.join("\n");
                self.block = None;
                return Some(Message::new(level, body));
            }
            lines.push(line.to_string());
            return None;
        }

        match split_prefix(line) {
            Some((level, ":")) => {
                self.block = Some((level, Vec::new()));
                None
            }
            Some((level, text)) => Some(Message::new(level, text)),
            None => Some(Message::new(self.default, line)),
        }
    }

    /// Flushes a block left open at end of stream.
    pub fn finish(&mut self) -> Option<Message> {
        self.block
            .take()
            .map(|(level, lines)| Message::new(level, lines.join("\n")))
    }
}

/// Splits `N::rest` into `(N, rest)`.
fn split_prefix(line: &str) -> Option<(Level, &str)> {
    let (head, rest) = line.split_once("::")?;
    if head.is_empty() || head.len() > 5 || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let level = head.parse::<u16>().ok()?;
    Some((Level(level), rest))
}

/// Reads `reader` line by line until EOF, classifying every line.
///
/// Internal-level messages go to `interceptor` (or are dropped); everything
/// else is sent on `tx`. The task ends at EOF, on a read error, or when the
/// receiver is gone.
pub fn consume<R>(
    reader: R,
    default: Level,
    tx: mpsc::Sender<Message>,
    interceptor: Option<Interceptor>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut classifier = Classifier::new(default);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "zpm.core.stream", error = %e, "stream read failed");
                    break;
                }
            }

            let raw = String::from_utf8_lossy(&buf);
            let line = raw.trim_end_matches(['\n', '\r']);
            if let Some(msg) = classifier.feed(line)
                && !forward(msg, &tx, interceptor.as_ref()).await
            {
                return;
            }
        }

        if let Some(msg) = classifier.finish() {
            forward(msg, &tx, interceptor.as_ref()).await;
        }
        trace!(target: "zpm.core.stream", level = %default, "stream closed");
    })
}

async fn forward(msg: Message, tx: &mpsc::Sender<Message>, interceptor: Option<&Interceptor>) -> bool {
    if msg.level().is_internal() {
        if let Some(intercept) = interceptor {
            intercept(&msg);
        }
        return true;
    }
    tx.send(msg).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[test]
    fn plain_lines_take_stream_level() {
        let mut c = Classifier::new(Level::STDERR);
        let msg = c.feed("hello world").unwrap();
        assert_eq!(msg.level(), Level::STDERR);
        assert_eq!(msg.message, "hello world");
    }

    #[test]
    fn prefixed_lines_select_level() {
        let mut c = Classifier::new(Level::STDOUT);
        let msg = c.feed(r#"20::{"a":1}"#).unwrap();
        assert_eq!(msg.level(), Level::RESULT_JSON);
        assert_eq!(msg.message, r#"{"a":1}"#);

        let msg = c.feed("8::disk on fire").unwrap();
        assert_eq!(msg.level(), Level::CRITICAL);
    }

    #[test]
    fn non_numeric_prefix_is_plain_text() {
        let mut c = Classifier::new(Level::STDOUT);
        assert_eq!(c.feed("std::io::Error").unwrap().level(), Level::STDOUT);
        assert_eq!(c.feed("::x").unwrap().level(), Level::STDOUT);
        assert_eq!(c.feed("999999::x").unwrap().level(), Level::STDOUT);
    }

    #[test]
    fn multi_line_block() {
        let mut c = Classifier::new(Level::STDOUT);
        assert!(c.feed("20:::").is_none());
        assert!(c.feed("{").is_none());
        assert!(c.feed(r#"  "k": "v""#).is_none());
        assert!(c.feed("}").is_none());

        let msg = c.feed(":::").unwrap();
        assert_eq!(msg.level(), Level::RESULT_JSON);
        assert_eq!(msg.message, "{\n  \"k\": \"v\"\n}");

        assert_eq!(c.feed("after").unwrap().level(), Level::STDOUT);
    }

    #[test]
    fn unterminated_block_is_flushed() {
        let mut c = Classifier::new(Level::STDOUT);
        c.feed("23:::");
        c.feed("partial");
        let msg = c.finish().unwrap();
        assert_eq!(msg.level(), Level::RESULT_HRD);
        assert_eq!(msg.message, "partial");
        assert!(c.finish().is_none());
    }

    #[tokio::test]
    async fn consume_forwards_and_intercepts() {
        let input: &[u8] = b"one\r\n101::4242\n9::a.b:1|A\ntail";
        let (tx, mut rx) = mpsc::channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let interceptor: Interceptor = Arc::new(move |m: &Message| {
            sink.lock().unwrap().push(m.message.clone());
        });

        consume(input, Level::STDOUT, tx, Some(interceptor))
            .await
            .unwrap();

        let mut got = Vec::new();
        while let Some(m) = rx.recv().await {
            got.push((m.level(), m.message));
        }
        assert_eq!(
            got,
            vec![
                (Level::STDOUT, "one".to_string()),
                (Level::STATSD, "a.b:1|A".to_string()),
                (Level::STDOUT, "tail".to_string()),
            ]
        );
        assert_eq!(*seen.lock().unwrap(), vec!["4242".to_string()]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let input: &[u8] = b"ok \xff\n";
        let (tx, mut rx) = mpsc::channel(2);
        consume(input, Level::STDOUT, tx, None).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.message, "ok \u{fffd}");
    }
}
