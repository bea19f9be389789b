//! Exec channel adapter: russh `ChannelMsg` -> `ChannelEvent`

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::{debug, trace};

use crate::transport::{ChannelEvent, RawChannel};

/// SSH extended data type code for stderr
const EXTENDED_DATA_STDERR: u32 = 1;

pub struct SshExecChannel {
    channel: Channel<Msg>,
}

impl SshExecChannel {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl RawChannel for SshExecChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Stdout(Bytes::copy_from_slice(&data)),
                ChannelMsg::ExtendedData { data, ext } if ext == EXTENDED_DATA_STDERR => {
                    ChannelEvent::Stderr(Bytes::copy_from_slice(&data))
                }
                ChannelMsg::ExtendedData { ext, .. } => {
                    trace!("[ssh] Ignoring extended data type {}", ext);
                    continue;
                }
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                } => ChannelEvent::ExitSignal {
                    signal: format!("{:?}", signal_name),
                    message: error_message,
                },
                ChannelMsg::Failure => ChannelEvent::Failure,
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Closed,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            debug!("[ssh] Channel close failed: {}", e);
        }
    }
}
