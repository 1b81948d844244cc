//! Commands module.
use crate::{
    parse::Parse, stream::StreamEntry, Connection, ConnectionStream, Db, Error, Frame, Result,
    ShutdownSignal,
};
use bytes::Bytes;

pub mod blpop;
pub use blpop::BlpopCmd;

pub mod echo;
pub use echo::EchoCmd;

pub mod get;
pub use get::GetCmd;

pub mod keytype;
pub use keytype::TypeCmd;

pub mod llen;
pub use llen::LlenCmd;

pub mod lpop;
pub use lpop::LpopCmd;

pub mod lrange;
pub use lrange::LrangeCmd;

pub mod ping;
pub use ping::PingCmd;

pub mod push;
pub use push::{LpushCmd, RpushCmd};

pub mod set;
pub use set::SetCmd;

pub mod xadd;
pub use xadd::XaddCmd;

pub mod xrange;
pub use xrange::XrangeCmd;

pub mod xread;
pub use xread::XreadCmd;

pub(crate) trait Command {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized;

    fn apply<S: ConnectionStream>(
        self,
        db: &Db,
        dst: &mut Connection<S>,
        shutdown: &mut ShutdownSignal,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn into_frame(self) -> Result<Frame>;
}

/// All possible command variants.
#[derive(Debug)]
pub enum CommandVariant {
    /// `BLPOP` command.
    Blpop(BlpopCmd),
    /// `ECHO` command.
    Echo(EchoCmd),
    /// `GET` command.
    Get(GetCmd),
    /// `LLEN` command.
    Llen(LlenCmd),
    /// `LPOP` command.
    Lpop(LpopCmd),
    /// `LPUSH` command.
    Lpush(LpushCmd),
    /// `LRANGE` command.
    Lrange(LrangeCmd),
    /// `PING` command.
    Ping(PingCmd),
    /// `RPUSH` command.
    Rpush(RpushCmd),
    /// `SET` command.
    Set(SetCmd),
    /// `TYPE` command.
    Type(TypeCmd),
    /// `XADD` command.
    Xadd(XaddCmd),
    /// `XRANGE` command.
    Xrange(XrangeCmd),
    /// `XREAD` command.
    Xread(XreadCmd),
}

impl CommandVariant {
    /// Parse a frame into a command variant.
    ///
    /// Missing, surplus or unknown pieces surface as recoverable
    /// `Error::Command` values, which the connection handler turns into
    /// `-ERR` replies.
    #[tracing::instrument(ret, skip_all, level = "debug")]
    pub fn from_frame(frame: Frame) -> Result<Self> {
        // An inline `+PING` is accepted as the bare `PING` command, for
        // compatibility with simple probes.
        if let Frame::SimpleString(verb) = &frame {
            if verb.eq_ignore_ascii_case("ping") {
                return Ok(CommandVariant::Ping(PingCmd::default()));
            }
        }

        let mut parse = Parse::new(frame)?;

        let command_name = parse.next_string()?.to_lowercase();

        match Self::parse_command(&command_name, &mut parse) {
            Ok(command) => Ok(command),
            // a half-missing argument list is an arity error for the verb,
            // not a dead connection
            Err(Error::EndOfStream) => Err(Error::Command(format!(
                "wrong number of arguments for '{command_name}' command"
            ))),
            Err(err) => Err(err),
        }
    }

    fn parse_command(name: &str, parse: &mut Parse) -> Result<Self> {
        use CommandVariant as C;

        let command = match name {
            "blpop" => C::Blpop(BlpopCmd::parse_frames(parse)?),
            "echo" => C::Echo(EchoCmd::parse_frames(parse)?),
            "get" => C::Get(GetCmd::parse_frames(parse)?),
            "llen" => C::Llen(LlenCmd::parse_frames(parse)?),
            "lpop" => C::Lpop(LpopCmd::parse_frames(parse)?),
            "lpush" => C::Lpush(LpushCmd::parse_frames(parse)?),
            "lrange" => C::Lrange(LrangeCmd::parse_frames(parse)?),
            "ping" => C::Ping(PingCmd::parse_frames(parse)?),
            "rpush" => C::Rpush(RpushCmd::parse_frames(parse)?),
            "set" => C::Set(SetCmd::parse_frames(parse)?),
            "type" => C::Type(TypeCmd::parse_frames(parse)?),
            "xadd" => C::Xadd(XaddCmd::parse_frames(parse)?),
            "xrange" => C::Xrange(XrangeCmd::parse_frames(parse)?),
            "xread" => C::Xread(XreadCmd::parse_frames(parse)?),
            _ => return Err(Error::Command(format!("unknown command '{name}'"))),
        };

        // surplus arguments are an arity violation too
        parse.finish().map_err(|_| Error::EndOfStream)?;

        Ok(command)
    }

    pub(crate) async fn apply<S: ConnectionStream>(
        self,
        db: &Db,
        dst: &mut Connection<S>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<()> {
        use CommandVariant as C;

        match self {
            C::Blpop(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Echo(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Get(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Llen(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Lpop(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Lpush(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Lrange(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Ping(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Rpush(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Set(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Type(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Xadd(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Xrange(cmd) => cmd.apply(db, dst, shutdown).await,
            C::Xread(cmd) => cmd.apply(db, dst, shutdown).await,
        }
    }

    pub fn get_name(&self) -> &str {
        use CommandVariant as C;
        match self {
            C::Blpop(_) => "blpop",
            C::Echo(_) => "echo",
            C::Get(_) => "get",
            C::Llen(_) => "llen",
            C::Lpop(_) => "lpop",
            C::Lpush(_) => "lpush",
            C::Lrange(_) => "lrange",
            C::Ping(_) => "ping",
            C::Rpush(_) => "rpush",
            C::Set(_) => "set",
            C::Type(_) => "type",
            C::Xadd(_) => "xadd",
            C::Xrange(_) => "xrange",
            C::Xread(_) => "xread",
        }
    }
}

/// Reply shape shared by `XRANGE` and `XREAD`:
/// `[id, [field, value, field, value, ...]]`.
pub(crate) fn stream_entry_frame(entry: StreamEntry) -> Frame {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (name, value) in entry.fields {
        fields.push(Frame::BulkString(name));
        fields.push(Frame::BulkString(value));
    }
    Frame::Array(vec![
        Frame::BulkString(Bytes::from(entry.id.to_string())),
        Frame::Array(fields),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn command_from(bytes: &[u8]) -> Result<CommandVariant> {
        let mut src = Cursor::new(bytes);
        let frame = Frame::parse(&mut src).expect("well-formed frame");
        CommandVariant::from_frame(frame)
    }

    /// Run one request through parse + dispatch against `db`, asserting the
    /// exact reply bytes via a mock stream.
    async fn roundtrip(db: &Db, request: &[u8], expected_reply: &[u8]) {
        let frame = Frame::parse(&mut Cursor::new(request)).expect("well-formed request");
        let cmd = CommandVariant::from_frame(frame).expect("parseable command");

        let stream = tokio_test::io::Builder::new().write(expected_reply).build();
        let mut connection = Connection::new(stream);
        // the sender stays alive for the whole call so the stop flag is
        // simply "not raised"
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let mut shutdown = ShutdownSignal::new(stop_rx);

        cmd.apply(db, &mut connection, &mut shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*2\r\n$4\r\nECHO\r\n$6\r\nbanana\r\n",
            b"$6\r\nbanana\r\n",
        )
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_px_then_get_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nPX\r\n$3\r\n100\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(&db, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$3\r\nbar\r\n").await;

        tokio::time::advance(Duration::from_millis(150)).await;
        roundtrip(&db, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_list_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*7\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$2\r\nv1\r\n$2\r\nv2\r\n$2\r\nv3\r\n$2\r\nv4\r\n$2\r\nv5\r\n",
            b":5\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*4\r\n$6\r\nLRANGE\r\n$1\r\nk\r\n$1\r\n0\r\n$1\r\n1\r\n",
            b"*2\r\n$2\r\nv1\r\n$2\r\nv2\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*4\r\n$6\r\nLRANGE\r\n$1\r\nk\r\n$2\r\n-3\r\n$2\r\n10\r\n",
            b"*3\r\n$2\r\nv3\r\n$2\r\nv4\r\n$2\r\nv5\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_stream_id_rules_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n0-0\r\n$1\r\nf\r\n$1\r\nv\r\n",
            b"-ERR The ID specified in XADD must be greater than 0-0\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n0-1\r\n$1\r\nf\r\n$1\r\nv\r\n",
            b"$3\r\n0-1\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n0-1\r\n$1\r\nf\r\n$1\r\nv\r\n",
            b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\ng\r\n$1\r\nw\r\n",
            b"$3\r\n1-1\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_xread_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\nf\r\n$1\r\nv\r\n",
            b"$3\r\n1-1\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n0-0\r\n",
            b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n",
        )
        .await;
        // nothing newer than 1-1: null array
        roundtrip(
            &db,
            b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n1-1\r\n",
            b"*-1\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_wrongtype_reply_end_to_end() {
        let db = Db::new();
        roundtrip(
            &db,
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(
            &db,
            b"*3\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$1\r\nx\r\n",
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        )
        .await;
    }

    #[test]
    fn test_verbs_are_case_insensitive() {
        let cmd = command_from(b"*2\r\n$4\r\nEcHo\r\n$2\r\nhi\r\n").unwrap();
        assert_eq!(cmd.get_name(), "echo");
    }

    #[test]
    fn test_inline_ping() {
        let mut src = Cursor::new(&b"+PING\r\n"[..]);
        let frame = Frame::parse(&mut src).unwrap();
        let cmd = CommandVariant::from_frame(frame).unwrap();
        assert_eq!(cmd.get_name(), "ping");
    }

    #[test]
    fn test_unknown_command() {
        let err = command_from(b"*1\r\n$4\r\nBLAH\r\n").unwrap_err();
        let reply = err.into_reply().unwrap();
        assert_eq!(
            reply,
            Frame::SimpleError("ERR unknown command 'blah'".to_string())
        );
    }

    #[test]
    fn test_arity_violations() {
        // too few
        let err = command_from(b"*1\r\n$4\r\nECHO\r\n").unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR wrong number of arguments for 'echo' command".to_string())
        );

        // too many
        let err = command_from(b"*3\r\n$3\r\nGET\r\n$1\r\nk\r\n$5\r\nextra\r\n").unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR wrong number of arguments for 'get' command".to_string())
        );
    }

    #[test]
    fn test_verb_is_taken_from_first_element_only() {
        // the payload contains the bytes "ECHO" but the verb is SET
        let cmd =
            command_from(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\nECHO\r\n").unwrap();
        assert_eq!(cmd.get_name(), "set");
    }
}
