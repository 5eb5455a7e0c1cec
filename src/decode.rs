//! Streaming gzip decoding of response bodies.

use crate::transport::ResponseBody;
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::io::{self, Write};

struct Gunzip {
    source: BoxStream<'static, io::Result<Bytes>>,
    decoder: GzDecoder<Vec<u8>>,
    pending: Option<Bytes>,
}

/// Wraps `body` in a gzip decoder.
///
/// The first non-empty chunk is decoded before returning, so a payload that
/// does not start with a gzip header fails here rather than on first read.
/// Errors raised while decoding later chunks are reported by the stream as
/// [`io::ErrorKind::InvalidData`].
pub(crate) async fn gunzip(body: ResponseBody) -> io::Result<ResponseBody> {
    let mut source = body.into_stream();
    let mut decoder = GzDecoder::new(Vec::new());
    let mut pending = None;

    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        decoder.write_all(&chunk).map_err(invalid_data)?;
        pending = Some(take_output(&mut decoder));
        break;
    }

    let state = Gunzip {
        source,
        decoder,
        pending,
    };

    let decoded = stream::unfold(Some(state), |state| async move {
        let Some(mut state) = state else {
            return None;
        };

        if let Some(out) = state.pending.take().filter(|out| !out.is_empty()) {
            return Some((Ok(out), Some(state)));
        }

        loop {
            match state.source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = state.decoder.write_all(&chunk) {
                        return Some((Err(invalid_data(e)), None));
                    }
                    let out = take_output(&mut state.decoder);
                    if !out.is_empty() {
                        return Some((Ok(out), Some(state)));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    return match state.decoder.try_finish() {
                        Ok(()) => {
                            let out = take_output(&mut state.decoder);
                            (!out.is_empty()).then_some((Ok(out), None))
                        }
                        Err(e) => Some((Err(invalid_data(e)), None)),
                    };
                }
            }
        }
    });

    Ok(ResponseBody::from_stream(decoded).decompressed())
}

fn take_output(decoder: &mut GzDecoder<Vec<u8>>) -> Bytes {
    Bytes::from(std::mem::take(decoder.get_mut()))
}

fn invalid_data(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::InvalidData {
        err
    } else {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures_util::TryStreamExt;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn collect(body: ResponseBody) -> io::Result<Vec<u8>> {
        let chunks: Vec<Bytes> = body.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_decodes_across_chunk_boundaries() {
        let payload = b"hello gzip world ".repeat(200);
        let compressed = gzip(&payload);
        let chunks: Vec<io::Result<Bytes>> = compressed
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let body = gunzip(ResponseBody::from_stream(stream::iter(chunks)))
            .await
            .unwrap();
        assert!(body.is_decompressing());
        assert_eq!(collect(body).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_bad_header_fails_eagerly() {
        let err = gunzip(ResponseBody::from_bytes("definitely not gzip"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_payload_fails_on_read() {
        let mut compressed = gzip(b"some payload that gets cut short");
        compressed.truncate(compressed.len() - 6);

        let body = gunzip(ResponseBody::from_bytes(compressed)).await.unwrap();
        let err = collect(body).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
