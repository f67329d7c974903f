//! Serialization and Snappy framing of remote-write payloads.
//!
//! The backend expects `Content-Encoding: snappy` with the whole message
//! compressed as a single raw Snappy block (not the framed stream format).

use prost::Message;

use crate::error::Result;
use crate::prompb::WriteRequest;

/// Validates, serializes and compresses a write request.
///
/// # Errors
///
/// Returns `RemoteWriteError::Schema` if the request is not schema-valid, or
/// `RemoteWriteError::Compression` if Snappy rejects the buffer.
pub fn encode(request: &WriteRequest) -> Result<Vec<u8>> {
    request.validate()?;
    compress(&request.encode_to_vec())
}

/// Decompresses and decodes a payload produced by [`encode`].
///
/// # Errors
///
/// Returns `RemoteWriteError::Compression` for a corrupt Snappy block or
/// `RemoteWriteError::Decode` for a malformed message.
pub fn decode(payload: &[u8]) -> Result<WriteRequest> {
    let raw = decompress(payload)?;
    Ok(WriteRequest::decode(raw.as_slice())?)
}

/// Compresses bytes as one raw Snappy block.
///
/// # Errors
///
/// Returns `RemoteWriteError::Compression` if the input is too large for a
/// single block.
pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(snap::raw::Encoder::new().compress_vec(raw)?)
}

/// Decompresses one raw Snappy block.
///
/// # Errors
///
/// Returns `RemoteWriteError::Compression` if the block is corrupt.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    Ok(snap::raw::Decoder::new().decompress_vec(compressed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteWriteError;
    use crate::prompb::{Label, Sample, TimeSeries};

    fn sample_request() -> WriteRequest {
        WriteRequest::new(vec![
            TimeSeries {
                labels: vec![
                    Label::new("__name__", "http_requests_total"),
                    Label::new("method", "GET"),
                    Label::new("route", "/cart"),
                ],
                samples: vec![Sample::new(12.0, 1_700_000_000_000), Sample::new(13.0, 1_700_000_005_000)],
            },
            TimeSeries {
                labels: vec![Label::new("__name__", "up"), Label::new("job", "customer-app")],
                samples: vec![Sample::new(1.0, 1_700_000_000_000)],
            },
        ])
    }

    #[test]
    fn encode_decode_round_trip() {
        let req = sample_request();
        let payload = encode(&req).unwrap();
        assert_eq!(decode(&payload).unwrap(), req);
    }

    #[test]
    fn payload_is_snappy_compressed() {
        let req = sample_request();
        let payload = encode(&req).unwrap();
        let raw = decompress(&payload).unwrap();
        assert_eq!(raw, req.encode_to_vec());
    }

    #[test]
    fn encode_rejects_invalid_request() {
        let req = WriteRequest::new(vec![TimeSeries {
            labels: vec![Label::new("job", "api")],
            samples: vec![Sample::new(1.0, 1)],
        }]);
        assert!(matches!(encode(&req), Err(RemoteWriteError::Schema { .. })));
    }

    #[test]
    fn wire_bytes_match_schema_field_numbers() {
        let req = WriteRequest::new(vec![TimeSeries {
            labels: vec![Label::new("__name__", "a")],
            samples: vec![Sample::new(1.0, 2)],
        }]);
        let bytes = req.encode_to_vec();

        // timeseries = 1, length-delimited
        assert_eq!(bytes[0], 0x0a);
        // labels = 1 inside TimeSeries
        assert_eq!(bytes[2], 0x0a);
        // name = 1, "__name__"
        assert_eq!(bytes[4], 0x0a);
        assert_eq!(&bytes[6..14], b"__name__");
        // value = 2, "a"
        assert_eq!(bytes[14], 0x12);
        assert_eq!(&bytes[16..17], b"a");
        // samples = 2 inside TimeSeries
        assert_eq!(bytes[17], 0x12);
        // value = 1 (double, wire type 1), timestamp = 2 (varint)
        assert_eq!(bytes[19], 0x09);
        assert_eq!(&bytes[20..28], &1.0f64.to_le_bytes());
        assert_eq!(bytes[28], 0x10);
        assert_eq!(bytes[29], 0x02);
    }

    #[test]
    fn decode_rejects_corrupt_payload() {
        let err = decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, RemoteWriteError::Compression { .. }));
    }

    #[test]
    fn decode_rejects_non_protobuf_payload() {
        let payload = compress(&[0x0a, 0x05, 0x01]).unwrap();
        let err = decode(&payload).unwrap_err();
        assert!(matches!(err, RemoteWriteError::Decode { .. }));
    }

    #[test]
    fn empty_request_round_trips() {
        let payload = encode(&WriteRequest::default()).unwrap();
        assert_eq!(decode(&payload).unwrap(), WriteRequest::default());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_series() -> impl Strategy<Value = TimeSeries> {
            (
                "[a-z_]{1,12}",
                proptest::collection::btree_map("[a-z][a-z_]{0,8}", "[ -~]{0,16}", 0..5),
                proptest::collection::vec((-1.0e12f64..1.0e12, any::<i64>()), 1..6),
            )
                .prop_map(|(metric, extra, samples)| {
                    let mut labels = vec![Label::new("__name__", metric)];
                    labels.extend(extra.into_iter().map(|(n, v)| Label::new(n, v)));
                    TimeSeries {
                        labels,
                        samples: samples.into_iter().map(|(v, t)| Sample::new(v, t)).collect(),
                    }
                })
        }

        proptest! {
            #[test]
            fn prop_encode_decode_round_trip(series in proptest::collection::vec(arb_series(), 0..8)) {
                let req = WriteRequest::new(series);
                let payload = encode(&req).unwrap();
                prop_assert_eq!(decode(&payload).unwrap(), req);
            }

            #[test]
            fn prop_compress_decompress_round_trip(raw in proptest::collection::vec(any::<u8>(), 0..4096)) {
                let compressed = compress(&raw).unwrap();
                prop_assert_eq!(decompress(&compressed).unwrap(), raw);
            }
        }
    }
}
