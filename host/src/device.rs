//! Simulated controller: serves a [`Controller`] over any async stream, the
//! way the rig firmware does over its serial port. Used for bench testing
//! host tools without hardware.

use rig_protocol::{CircuitTable, ConfigStore, Controller, Framer, LinkError, Profile};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::client::FEED_LEN;
use crate::error::Result;

/// Answer packets arriving on `stream` until the peer closes it, then hand
/// the controller back.
///
/// Packets the controller rejects are dropped with a warning, like corrupt
/// frames; the sender's timeout covers them.
pub async fn serve_controller<S, St, T>(
    mut stream: S,
    mut controller: Controller<St, T>,
    profile: Profile,
) -> Result<Controller<St, T>>
where
    S: AsyncRead + AsyncWrite + Unpin,
    St: ConfigStore,
    T: CircuitTable,
{
    let started = Instant::now();
    let mut framer: Framer = Framer::new(profile);
    let mut buf = [0u8; 256];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            log::info!("controller peer closed, {:?}", framer.stats());
            return Ok(controller);
        }

        for piece in buf[..n].chunks(FEED_LEN) {
            if framer.push_bytes(piece).is_err() {
                log::warn!("controller rx ring overflow");
            }
            while let Some(packet) = framer.read() {
                controller.system_mut().uptime_secs = started.elapsed().as_secs() as u32;
                let replies = match controller.handle(&packet) {
                    Ok(replies) => replies,
                    Err(e) => {
                        log::warn!("dropping {:?} packet: {:?}", packet.kind, e);
                        continue;
                    }
                };
                for reply in &replies {
                    let frame = framer.encode(reply).map_err(LinkError::from)?;
                    stream.write_all(frame).await?;
                }
            }
        }
        stream.flush().await?;
    }
}
