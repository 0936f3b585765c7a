use std::sync::Arc;

use async_trait::async_trait;

use crate::handle::ConnectionHandle;
use crate::stream::cleanup::FireOnce;
use crate::stream::frame::{frame_len, Frame};
use crate::Shaper;

/// Anything that can produce frames, in terms general enough that this
/// crate never depends on a concrete proxy stream type.
#[async_trait]
pub trait FrameReader: Send {
    type Error: Send;

    async fn read_frame(&mut self) -> Result<Frame, Self::Error>;
}

/// Anything that can consume frames.
#[async_trait]
pub trait FrameWriter: Send {
    type Error: Send;

    async fn write_frame(&mut self, frame: Frame) -> Result<(), Self::Error>;
}

/// Meters, shapes and accounts for every frame read from `inner`, then
/// invokes its cleanup exactly once on the first read error.
pub struct ShapedReader<R> {
    inner: R,
    shaper: Arc<Shaper>,
    handle: ConnectionHandle,
    user: String,
    cleanup: Arc<dyn FireOnce>,
}

impl<R> ShapedReader<R> {
    pub fn new(
        inner: R,
        shaper: Arc<Shaper>,
        handle: ConnectionHandle,
        user: String,
        cleanup: Arc<dyn FireOnce>,
    ) -> Self {
        Self {
            inner,
            shaper,
            handle,
            user,
            cleanup,
        }
    }

    /// Invokes the wrapper's cleanup directly, e.g. on an external
    /// interrupt signal rather than an I/O error.
    pub fn interrupt(&self) {
        self.cleanup.fire();
    }
}

#[async_trait]
impl<R: FrameReader> FrameReader for ShapedReader<R> {
    type Error = R::Error;

    async fn read_frame(&mut self) -> Result<Frame, Self::Error> {
        let result = self.inner.read_frame().await;
        match &result {
            Ok(frame) => {
                let n = frame_len(frame);
                if n > 0 {
                    if let Some(limit) = self
                        .shaper
                        .limits
                        .get_for_conn(&self.user, self.handle)
                        .filter(|l| l.up_bps > 0)
                    {
                        let (up, _down) =
                            self.shaper
                                .buckets
                                .get_or_create(self.handle, limit.up_bps, limit.down_bps);
                        up.wait(n).await;
                    }
                    self.shaper.connections.add_rx(self.handle, n as u64);
                }
            }
            Err(_) => self.cleanup.fire(),
        }
        result
    }
}

/// Meters, shapes and accounts for every frame written to `inner`, then
/// invokes its cleanup exactly once on the first write error.
pub struct ShapedWriter<W> {
    inner: W,
    shaper: Arc<Shaper>,
    handle: ConnectionHandle,
    user: String,
    cleanup: Arc<dyn FireOnce>,
}

impl<W> ShapedWriter<W> {
    pub fn new(
        inner: W,
        shaper: Arc<Shaper>,
        handle: ConnectionHandle,
        user: String,
        cleanup: Arc<dyn FireOnce>,
    ) -> Self {
        Self {
            inner,
            shaper,
            handle,
            user,
            cleanup,
        }
    }

    pub fn close(&self) {
        self.cleanup.fire();
    }
}

#[async_trait]
impl<W: FrameWriter> FrameWriter for ShapedWriter<W> {
    type Error = W::Error;

    async fn write_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let n = frame_len(&frame);
        if n > 0 {
            if let Some(limit) = self
                .shaper
                .limits
                .get_for_conn(&self.user, self.handle)
                .filter(|l| l.down_bps > 0)
            {
                let (_up, down) =
                    self.shaper
                        .buckets
                        .get_or_create(self.handle, limit.up_bps, limit.down_bps);
                down.wait(n).await;
            }
            self.shaper.connections.add_tx(self.handle, n as u64);
        }

        let result = self.inner.write_frame(frame).await;
        if result.is_err() {
            self.cleanup.fire();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::limits::RateLimit;
    use crate::stream::cleanup::Cleanup;
    use bytes::Bytes;

    struct VecReader(Vec<Frame>);

    #[async_trait]
    impl FrameReader for VecReader {
        type Error = ();

        async fn read_frame(&mut self) -> Result<Frame, ()> {
            if self.0.is_empty() {
                Err(())
            } else {
                Ok(self.0.remove(0))
            }
        }
    }

    struct VecWriter(Vec<Frame>, bool);

    #[async_trait]
    impl FrameWriter for VecWriter {
        type Error = ();

        async fn write_frame(&mut self, frame: Frame) -> Result<(), ()> {
            if self.1 {
                return Err(());
            }
            self.0.push(frame);
            Ok(())
        }
    }

    #[tokio::test]
    async fn read_accounts_rx_bytes_and_propagates_frame() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        let inner = VecReader(vec![vec![Bytes::from_static(b"hello")]]);
        let mut reader = ShapedReader::new(
            inner,
            shaper.clone(),
            info.handle,
            "u".to_string(),
            Cleanup::noop(),
        );

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame_len(&frame), 5);
        assert_eq!(info.rx_bytes(), 5);
    }

    #[tokio::test]
    async fn read_error_fires_standalone_cleanup() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        let inner = VecReader(vec![]);
        let cleanup = Cleanup::standalone(shaper.clone(), info.handle);
        let mut reader =
            ShapedReader::new(inner, shaper.clone(), info.handle, "u".to_string(), cleanup);

        assert!(reader.read_frame().await.is_err());
        assert!(shaper.connections.get(info.handle).is_none());
    }

    #[tokio::test]
    async fn write_accounts_tx_bytes_before_forwarding() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        let inner = VecWriter(Vec::new(), false);
        let mut writer = ShapedWriter::new(
            inner,
            shaper.clone(),
            info.handle,
            "u".to_string(),
            Cleanup::noop(),
        );

        writer
            .write_frame(vec![Bytes::from_static(b"abc")])
            .await
            .unwrap();
        assert_eq!(info.tx_bytes(), 3);
    }

    #[tokio::test]
    async fn write_error_fires_standalone_cleanup() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        let inner = VecWriter(Vec::new(), true);
        let cleanup = Cleanup::standalone(shaper.clone(), info.handle);
        let mut writer =
            ShapedWriter::new(inner, shaper.clone(), info.handle, "u".to_string(), cleanup);

        assert!(writer.write_frame(vec![Bytes::from_static(b"x")]).await.is_err());
        assert!(shaper.connections.get(info.handle).is_none());
    }

    #[tokio::test]
    async fn unlimited_connection_never_creates_a_bucket() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        let inner = VecReader(vec![vec![Bytes::from_static(b"hello")]]);
        let mut reader = ShapedReader::new(
            inner,
            shaper.clone(),
            info.handle,
            "u".to_string(),
            Cleanup::noop(),
        );
        reader.read_frame().await.unwrap();
        assert!(shaper.buckets.get(info.handle).is_none());
    }

    #[tokio::test]
    async fn limited_connection_is_shaped_on_read() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        shaper.limits.set_conn_limit(
            info.handle,
            RateLimit {
                down_bps: 8_000,
                up_bps: 8_000,
            },
        );
        let inner = VecReader(vec![vec![Bytes::from_static(b"hello")]]);
        let mut reader = ShapedReader::new(
            inner,
            shaper.clone(),
            info.handle,
            "u".to_string(),
            Cleanup::noop(),
        );
        reader.read_frame().await.unwrap();
        assert!(shaper.buckets.get(info.handle).is_some());
    }
}
