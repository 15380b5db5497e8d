//! Scripted single-client FTP server on loopback, for tests.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone)]
pub(crate) struct ServerScript {
    greeting: Vec<Vec<u8>>,
    user: Option<(String, String)>,
    directory: String,
    files: Vec<(String, Vec<u8>)>,
    abort_after: Option<usize>,
}

impl ServerScript {
    pub(crate) fn new(directory: &str) -> Self {
        Self {
            greeting: vec![b"220 fake ftp ready".to_vec()],
            user: None,
            directory: directory.to_string(),
            files: Vec::new(),
            abort_after: None,
        }
    }

    pub(crate) fn with_greeting(mut self, lines: &[&str]) -> Self {
        self.greeting = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        self
    }

    /// Greeting sent byte for byte, for servers that do not speak UTF-8.
    pub(crate) fn with_raw_greeting(mut self, line: &[u8]) -> Self {
        self.greeting = vec![line.to_vec()];
        self
    }

    /// Only this user/password pair is accepted; anonymous otherwise.
    pub(crate) fn with_user(mut self, user: &str, password: &str) -> Self {
        self.user = Some((user.to_string(), password.to_string()));
        self
    }

    pub(crate) fn with_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.push((name.to_string(), data));
        self
    }

    /// Drops the data connection after `bytes` and answers 426.
    pub(crate) fn abort_after(mut self, bytes: usize) -> Self {
        self.abort_after = Some(bytes);
        self
    }

    fn file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }
}

pub(crate) struct FakeFtpServer {
    port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl FakeFtpServer {
    pub(crate) fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve(stream, script)
        });
        Self { port, handle }
    }

    /// A loopback port nothing listens on.
    pub(crate) fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the client to go away; returns every command received.
    pub(crate) fn finish(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

fn reply(stream: &mut TcpStream, line: &str) {
    let _ = stream.write_all(format!("{line}\r\n").as_bytes());
}

fn serve(stream: TcpStream, script: ServerScript) -> Vec<String> {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut commands = Vec::new();
    let mut user = String::new();
    let mut data_listener: Option<TcpListener> = None;

    for line in &script.greeting {
        let _ = writer.write_all(line);
        let _ = writer.write_all(b"\r\n");
    }

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end().to_string();
        commands.push(line.clone());

        let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match verb {
            "USER" => {
                user = argument.to_string();
                reply(&mut writer, "331 Password required");
            }
            "PASS" => {
                let accepted = match &script.user {
                    Some((u, p)) => *u == user && p == argument,
                    None => user == "anonymous",
                };
                if accepted {
                    reply(&mut writer, "230 Logged in");
                } else {
                    reply(&mut writer, "530 Login incorrect");
                }
            }
            "CWD" => {
                if argument.trim_end_matches('/') == script.directory.trim_end_matches('/') {
                    reply(&mut writer, "250 Directory changed");
                } else {
                    reply(&mut writer, "550 No such directory");
                }
            }
            "TYPE" => reply(&mut writer, "200 Type set"),
            "SIZE" => match script.file(argument) {
                Some(data) => reply(&mut writer, &format!("213 {}", data.len())),
                None => reply(&mut writer, "550 File not found"),
            },
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                let port = listener.local_addr().unwrap().port();
                data_listener = Some(listener);
                reply(
                    &mut writer,
                    &format!("227 Entering Passive Mode (127,0,0,1,{},{})", port >> 8, port & 0xff),
                );
            }
            "RETR" | "MLSD" => {
                let payload = if verb == "MLSD" {
                    Some(
                        script
                            .files
                            .iter()
                            .map(|(name, data)| format!("type=file;size={}; {name}\r\n", data.len()))
                            .chain(std::iter::once("type=dir; nested\r\n".to_string()))
                            .collect::<String>()
                            .into_bytes(),
                    )
                } else {
                    script.file(argument).map(|d| d.to_vec())
                };

                let Some(payload) = payload else {
                    data_listener = None;
                    reply(&mut writer, "550 File not found");
                    continue;
                };
                let Some(listener) = data_listener.take() else {
                    reply(&mut writer, "425 Use PASV first");
                    continue;
                };

                reply(&mut writer, "150 Opening BINARY mode data connection");
                let (mut data, _) = listener.accept().unwrap();
                match script.abort_after.filter(|_| verb == "RETR") {
                    Some(limit) => {
                        let _ = data.write_all(&payload[..limit.min(payload.len())]);
                        drop(data);
                        reply(&mut writer, "426 Connection closed; transfer aborted");
                    }
                    None => {
                        let _ = data.write_all(&payload);
                        drop(data);
                        reply(&mut writer, "226 Transfer complete");
                    }
                }
            }
            "QUIT" => {
                reply(&mut writer, "221 Goodbye");
                break;
            }
            _ => reply(&mut writer, "502 Command not implemented"),
        }
    }

    commands
}
