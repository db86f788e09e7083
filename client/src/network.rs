use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A line-oriented connection to the server
pub struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    pub async fn connect(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        info!("Connected to {}", stream.peer_addr()?);

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        debug!("> {}", line);
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        self.writer.flush().await
    }

    /// Next line from the server; `None` once the server has closed the connection
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let line = self.lines.next_line().await?;
        if let Some(line) = &line {
            debug!("< {}", line);
        }
        Ok(line)
    }

    pub async fn read_line_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<String>> {
        match tokio::time::timeout(timeout, self.read_line()).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply from server",
            )),
        }
    }

    /// Reads lines until one satisfies `predicate`, returning every line read
    pub async fn read_until<F>(
        &mut self,
        timeout: Duration,
        mut predicate: F,
    ) -> std::io::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            match self.read_line_timeout(timeout).await? {
                Some(line) => {
                    let done = predicate(&line);
                    lines.push(line);
                    if done {
                        return Ok(lines);
                    }
                }
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    ))
                }
            }
        }
    }

    pub async fn close(mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Relays stdin to the server and server lines to stdout until either side ends
pub struct Client {
    connection: Connection,
}

impl Client {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let connection = Connection::connect(server_addr).await?;
        Ok(Client { connection })
    }

    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                line = self.connection.read_line() => match line? {
                    Some(line) => {
                        stdout.write_all(format!("{}\n", line).as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    None => {
                        info!("Server closed the connection");
                        break;
                    }
                },

                input = stdin.next_line(), if stdin_open => match input {
                    Ok(Some(input)) => self.connection.send_line(&input).await?,
                    Ok(None) => {
                        // Keep printing replies until the server hangs up
                        stdin_open = false;
                        self.connection.writer.shutdown().await?;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        stdin_open = false;
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn scripted_server(script: &'static [(&'static str, &'static str)]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer.write_all(b"Enter a command: /register or /login.\n").await.unwrap();
            for (expected, reply) in script {
                let line = lines.next_line().await.unwrap().unwrap();
                assert_eq!(&line, expected);
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_send_and_read_lines() {
        let addr = scripted_server(&[("/register", "Enter username:\n")]).await;
        let mut connection = Connection::connect(&addr).await.unwrap();

        let prompt = connection
            .read_line_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(prompt.as_deref(), Some("Enter a command: /register or /login."));

        connection.send_line("/register").await.unwrap();
        let reply = connection
            .read_line_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Enter username:"));

        // Server task has finished its script and dropped the socket
        assert_eq!(connection.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_until_collects_multi_line_replies() {
        let addr = scripted_server(&[("/my", "Name: bob\nLocation: (0, 0)\nClan: none\n")]).await;
        let mut connection = Connection::connect(&addr).await.unwrap();
        connection.read_line().await.unwrap();

        connection.send_line("/my").await.unwrap();
        let lines = connection
            .read_until(Duration::from_secs(5), |line| line.starts_with("Clan:"))
            .await
            .unwrap();
        assert_eq!(lines, vec!["Name: bob", "Location: (0, 0)", "Clan: none"]);
    }

    #[tokio::test]
    async fn test_read_until_reports_closed_connection() {
        let addr = scripted_server(&[]).await;
        let mut connection = Connection::connect(&addr).await.unwrap();

        let error = connection
            .read_until(Duration::from_secs(5), |line| line == "never")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_read_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _accepting = tokio::spawn(async move {
            let _held = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut connection = Connection::connect(&addr).await.unwrap();
        let error = connection
            .read_line_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::TimedOut);
    }
}
