use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 1回の読み込みで転送する最大バイト数
pub const TRANSFER_UNIT: usize = 1024;

/// 片方向のバイト転送ループ
///
/// `reader` がEOFを返すまで読み込み、読んだバイトをそのまま `writer` に書き込む。
/// 書き込みごとにフラッシュしてから次の読み込みを行うため、
/// 遅い書き込み先より先に読み進めることはない。
///
/// 戻り値はEOFまでに転送したバイト数。読み書きのエラーはそのまま返す。
/// future をドロップすればキャンセルされ、読み込み済みで未送信のデータは破棄される。
pub async fn copy_loop<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = [0u8; TRANSFER_UNIT];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// 書き込みサイズを記録するライター
    #[derive(Default)]
    struct RecordingWriter {
        data: Vec<u8>,
        writes: Vec<usize>,
        flushes: usize,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.data.extend_from_slice(buf);
            self.writes.push(buf.len());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// 常に失敗するライター
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_copies_until_eof() {
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let mut reader = payload.as_slice();
        let mut writer = RecordingWriter::default();

        let n = copy_loop(&mut reader, &mut writer).await.unwrap();

        assert_eq!(n, 2500);
        assert_eq!(writer.data, payload);
        // 1024バイト単位で分割され、書き込みごとにフラッシュされる
        assert_eq!(writer.writes, vec![1024, 1024, 452]);
        assert_eq!(writer.flushes, 3);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut reader: &[u8] = &[];
        let mut writer = RecordingWriter::default();

        let n = copy_loop(&mut reader, &mut writer).await.unwrap();

        assert_eq!(n, 0);
        assert!(writer.writes.is_empty());
    }

    #[tokio::test]
    async fn test_write_error_stops_loop() {
        let mut reader: &[u8] = b"hello";
        let result = copy_loop(&mut reader, &mut BrokenWriter).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_relays_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut sink = Vec::new();

        let writer_task = tokio::spawn(async move {
            client.write_all(b"hello world").await.unwrap();
            client.shutdown().await.unwrap();
        });

        let n = copy_loop(&mut server, &mut sink).await.unwrap();
        writer_task.await.unwrap();

        assert_eq!(n, 11);
        assert_eq!(sink, b"hello world");
    }
}
