use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::{
    cmd::{
        BlpopCmd, Command, EchoCmd, GetCmd, LlenCmd, LpopCmd, LpushCmd, LrangeCmd, PingCmd,
        RpushCmd, SetCmd, TypeCmd, XaddCmd, XrangeCmd, XreadCmd,
    },
    stream::{StreamEntry, StreamId},
    Connection, ConnectionStream, Error, Frame, Result,
};

/// Established connection with the server.
///
/// Backed by a single stream, `Client` provides basic network client
/// functionality (no pooling, retrying, ...). Requests are issued using the
/// various methods of `Client`, one per server verb. Error replies
/// (`-ERR ...`, `-WRONGTYPE ...`) surface as [`Error::Command`].
#[derive(Debug)]
pub struct Client<S: ConnectionStream> {
    /// The connection decorated with the RESP encoder / decoder.
    connection: Connection<S>,
}

impl Client<TcpStream> {
    /// Establish a connection with the server located at `addr`.
    ///
    /// `addr` may be any type that can be asynchronously converted to a
    /// `SocketAddr`. This includes `SocketAddr` and strings. The `ToSocketAddrs`
    /// trait is the Tokio version and not the `std` version.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Client<TcpStream>> {
        let socket = TcpStream::connect(addr).await?;
        let connection = Connection::new(socket);
        Ok(Client { connection })
    }
}

impl<S: ConnectionStream> Client<S> {
    /// Wrap an already-established stream.
    pub fn new(stream: S) -> Client<S> {
        Client {
            connection: Connection::new(stream),
        }
    }

    /// Ping the server.
    ///
    /// Returns PONG if no argument is provided, otherwise
    /// returns a copy of the argument as a bulk.
    ///
    /// This command is often used to test if a connection
    /// is still alive, or to measure latency.
    #[tracing::instrument(skip(self))]
    pub async fn ping(&mut self, msg: Option<Bytes>) -> Result<Bytes> {
        self.send(PingCmd::new(msg)).await?;
        match self.read_response().await? {
            Frame::SimpleString(val) => Ok(val.into()),
            Frame::BulkString(val) => Ok(val),
            frame => Err(unexpected(frame)),
        }
    }

    /// Ask the server to echo `msg` back.
    #[tracing::instrument(skip(self))]
    pub async fn echo(&mut self, msg: Bytes) -> Result<Bytes> {
        self.send(EchoCmd::new(msg)).await?;
        match self.read_response().await? {
            Frame::BulkString(val) => Ok(val),
            frame => Err(unexpected(frame)),
        }
    }

    /// Get the value of key.
    ///
    /// If the key does not exist `None` is returned.
    #[tracing::instrument(skip(self))]
    pub async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        self.send(GetCmd::new(key)).await?;
        match self.read_response().await? {
            Frame::SimpleString(val) => Ok(Some(val.into())),
            Frame::BulkString(val) => Ok(Some(val)),
            Frame::NullBulkString => Ok(None),
            frame => Err(unexpected(frame)),
        }
    }

    /// Set `key` to hold the given `value`.
    ///
    /// If key already holds a value, it is overwritten. Any previous time to
    /// live associated with the key is discarded on successful SET operation.
    pub async fn set(&mut self, key: &str, value: Bytes) -> Result<()> {
        self.set_cmd(SetCmd::new(key, value, None)).await
    }

    /// Set `key` to hold the given `value`, expiring after `expire`.
    pub async fn set_expires(&mut self, key: &str, value: Bytes, expire: Duration) -> Result<()> {
        self.set_cmd(SetCmd::new(key, value, Some(expire))).await
    }

    async fn set_cmd(&mut self, cmd: SetCmd) -> Result<()> {
        self.send(cmd).await?;
        match self.read_response().await? {
            Frame::SimpleString(val) if val == "OK" => Ok(()),
            frame => Err(unexpected(frame)),
        }
    }

    /// Append `values` to the tail of the list at `key`; returns the new length.
    #[tracing::instrument(skip(self))]
    pub async fn rpush(&mut self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        self.send(RpushCmd::new(key, values)).await?;
        self.read_int_response().await
    }

    /// Prepend `values` to the head of the list at `key`; returns the new length.
    #[tracing::instrument(skip(self))]
    pub async fn lpush(&mut self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        self.send(LpushCmd::new(key, values)).await?;
        self.read_int_response().await
    }

    /// The inclusive slice `[start..=stop]` of the list at `key`.
    #[tracing::instrument(skip(self))]
    pub async fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.send(LrangeCmd::new(key, start, stop)).await?;
        match self.read_response().await? {
            Frame::Array(frames) => frames
                .into_iter()
                .map(|frame| match frame {
                    Frame::BulkString(val) => Ok(val),
                    frame => Err(unexpected(frame)),
                })
                .collect(),
            frame => Err(unexpected(frame)),
        }
    }

    /// Length of the list at `key`; zero when the key is absent.
    #[tracing::instrument(skip(self))]
    pub async fn llen(&mut self, key: &str) -> Result<i64> {
        self.send(LlenCmd::new(key)).await?;
        self.read_int_response().await
    }

    /// Pop up to `count` elements (one if `count` is `None`) from the head
    /// of the list at `key`. An empty vector means there was nothing to pop.
    #[tracing::instrument(skip(self))]
    pub async fn lpop(&mut self, key: &str, count: Option<i64>) -> Result<Vec<Bytes>> {
        self.send(LpopCmd::new(key, count)).await?;
        match self.read_response().await? {
            Frame::NullBulkString | Frame::NullArray => Ok(Vec::new()),
            Frame::BulkString(val) => Ok(vec![val]),
            Frame::Array(frames) => frames
                .into_iter()
                .map(|frame| match frame {
                    Frame::BulkString(val) => Ok(val),
                    frame => Err(unexpected(frame)),
                })
                .collect(),
            frame => Err(unexpected(frame)),
        }
    }

    /// Pop from the head of the list at `key`, blocking up to `timeout`
    /// seconds (`0.0` waits forever). `None` means the wait timed out;
    /// otherwise the pair is the key and the popped element.
    #[tracing::instrument(skip(self))]
    pub async fn blpop(&mut self, key: &str, timeout: f64) -> Result<Option<(String, Bytes)>> {
        let timeout = (timeout > 0.0).then(|| Duration::from_secs_f64(timeout));
        self.send(BlpopCmd::new(key, timeout)).await?;
        match self.read_response().await? {
            Frame::NullArray => Ok(None),
            Frame::Array(frames) => {
                let mut frames = frames.into_iter();
                match (frames.next(), frames.next()) {
                    (Some(Frame::BulkString(key)), Some(Frame::BulkString(element))) => {
                        let key = String::from_utf8(key.to_vec())?;
                        Ok(Some((key, element)))
                    }
                    _ => Err(Error::Response("malformed BLPOP reply".to_string())),
                }
            }
            frame => Err(unexpected(frame)),
        }
    }

    /// Kind of the value at `key`: `string`, `list`, `stream` or `none`.
    #[tracing::instrument(skip(self))]
    pub async fn key_type(&mut self, key: &str) -> Result<String> {
        self.send(TypeCmd::new(key)).await?;
        match self.read_response().await? {
            Frame::SimpleString(val) => Ok(val),
            frame => Err(unexpected(frame)),
        }
    }

    /// Append an entry to the stream at `key`; `id` takes the wire syntax
    /// (`*`, `<ms>-*` or `<ms>-<seq>`). Returns the assigned id.
    #[tracing::instrument(skip(self))]
    pub async fn xadd(
        &mut self,
        key: &str,
        id: &str,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<String> {
        self.send(XaddCmd::new(key, id, fields)?).await?;
        match self.read_response().await? {
            Frame::BulkString(val) => Ok(String::from_utf8(val.to_vec())?),
            frame => Err(unexpected(frame)),
        }
    }

    /// Entries of the stream at `key` with ids in the closed interval
    /// `[start, end]` (wire syntax, including the `-`/`+` sentinels).
    #[tracing::instrument(skip(self))]
    pub async fn xrange(&mut self, key: &str, start: &str, end: &str) -> Result<Vec<StreamEntry>> {
        self.send(XrangeCmd::new(key, start, end)?).await?;
        match self.read_response().await? {
            Frame::Array(frames) => frames.into_iter().map(parse_entry).collect(),
            frame => Err(unexpected(frame)),
        }
    }

    /// Entries strictly newer than the given ids, grouped per stream.
    ///
    /// `block` of `None` returns immediately; `Some(secs)` blocks up to that
    /// many seconds (`0.0` forever). An empty vector means nothing was new
    /// (or the blocking wait timed out).
    #[tracing::instrument(skip(self))]
    pub async fn xread(
        &mut self,
        block: Option<f64>,
        queries: &[(&str, &str)],
    ) -> Result<Vec<(String, Vec<StreamEntry>)>> {
        let block = block.map(|secs| (secs > 0.0).then(|| Duration::from_secs_f64(secs)));
        self.send(XreadCmd::new(block, queries)?).await?;
        match self.read_response().await? {
            Frame::NullArray => Ok(Vec::new()),
            Frame::Array(groups) => groups
                .into_iter()
                .map(|group| {
                    let Frame::Array(parts) = group else {
                        return Err(Error::Response("malformed XREAD reply".to_string()));
                    };
                    let mut parts = parts.into_iter();
                    match (parts.next(), parts.next()) {
                        (Some(Frame::BulkString(key)), Some(Frame::Array(entries))) => {
                            let key = String::from_utf8(key.to_vec())?;
                            let entries = entries
                                .into_iter()
                                .map(parse_entry)
                                .collect::<Result<Vec<_>>>()?;
                            Ok((key, entries))
                        }
                        _ => Err(Error::Response("malformed XREAD reply".to_string())),
                    }
                })
                .collect(),
            frame => Err(unexpected(frame)),
        }
    }

    /// Encode a command and write it out, waiting if necessary.
    async fn send(&mut self, cmd: impl Command) -> Result<()> {
        let frame = cmd.into_frame()?;
        debug!(request = ?frame);
        self.connection.write_frame(&frame).await
    }

    /// Wait for the response frame from the server.
    ///
    /// Error replies become [`Error::Command`]; a closed connection is an IO
    /// error.
    async fn read_response(&mut self) -> Result<Frame> {
        let response = self.connection.read_frame().await?;

        debug!(?response);

        match response {
            Some(Frame::SimpleError(msg)) => Err(Error::Command(msg)),
            Some(frame) => Ok(frame),
            // Receiving `None` here indicates the server has closed the
            // connection without sending a frame.
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by server",
            ))),
        }
    }

    async fn read_int_response(&mut self) -> Result<i64> {
        match self.read_response().await? {
            Frame::Integer(val) => Ok(val),
            frame => Err(unexpected(frame)),
        }
    }
}

fn unexpected(frame: Frame) -> Error {
    Error::Response(format!("unexpected frame: {frame:?}"))
}

/// Decode the `[id, [field, value, ...]]` shape used by `XRANGE`/`XREAD`.
fn parse_entry(frame: Frame) -> Result<StreamEntry> {
    let Frame::Array(parts) = frame else {
        return Err(Error::Response("malformed stream entry".to_string()));
    };
    let mut parts = parts.into_iter();
    let (Some(Frame::BulkString(raw_id)), Some(Frame::Array(raw_fields))) =
        (parts.next(), parts.next())
    else {
        return Err(Error::Response("malformed stream entry".to_string()));
    };

    let id = std::str::from_utf8(&raw_id)
        .map_err(|_| Error::Response("malformed stream entry id".to_string()))
        .and_then(|raw| {
            StreamId::parse(raw).map_err(|_| Error::Response("malformed stream entry id".to_string()))
        })?;

    let mut fields = Vec::with_capacity(raw_fields.len() / 2);
    let mut raw_fields = raw_fields.into_iter();
    while let Some(name) = raw_fields.next() {
        let (Frame::BulkString(name), Some(Frame::BulkString(value))) = (name, raw_fields.next())
        else {
            return Err(Error::Response("malformed stream entry fields".to_string()));
        };
        fields.push((name, value));
    }

    Ok(StreamEntry { id, fields })
}
