//! 分块接收状态机
//!
//! ```text
//!            metadata                     chunk (累加, 计算进度)
//!   Idle ───────────────▶ Accumulating ◀──────────┐
//!    ▲                      │   │  └──────────────┘
//!    │        end (拼接, 完成) │   │ metadata (放弃当前文件, 重新开始)
//!    └──────────────────────┘   └──────▶ Accumulating
//! ```
//!
//! 同一时刻只有一个"当前文件"，不支持两个文件的分块交错。

use log::{debug, warn};

use super::protocol::{FileAck, FileMetadata, WireMessage};
use super::FileSummary;

/// 解码器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Accumulating,
}

#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// 结束时实际字节数与声明大小不符则丢弃该文件
    pub strict_size: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("File {name} size mismatch: declared {declared} bytes, received {received} bytes")]
    SizeMismatch {
        name: String,
        uuid: Option<String>,
        declared: u64,
        received: u64,
    },
}

/// 已完整接收的文件
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub uuid: Option<String>,
    pub declared_size: u64,
    pub payload: Vec<u8>,
}

impl ReceivedFile {
    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn size_mismatch(&self) -> bool {
        self.len() != self.declared_size
    }

    /// 回给发送端的确认
    pub fn ack(&self) -> FileAck {
        FileAck {
            name: self.name.clone(),
            uuid: self.uuid.clone(),
        }
    }
}

impl std::fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("uuid", &self.uuid)
            .field("declared_size", &self.declared_size)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// 一次 dispatch 产生的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// 开始接收新文件
    Started(FileSummary),
    /// 当前文件进度 (0-100)
    Progress { name: String, percent: u8 },
    /// 文件完成，可交给本地保存
    Completed(ReceivedFile),
    /// 当前文件未完成即被新的元数据替换
    Abandoned { name: String, percent: u8 },
    /// 发送端声明本次会话结束
    SessionEnd,
    /// 收到确认（发送端方向）
    Ack(FileAck),
    /// 与当前状态不符的消息
    Ignored(&'static str),
}

struct Accumulation {
    metadata: FileMetadata,
    chunks: Vec<Vec<u8>>,
    received: u64,
    percent: u8,
}

/// 计算进度百分比
///
/// `round(received * 100 / declared)`，限制在 0..=100。
/// 还有字节未到时最多报告 99；声明大小为 0 视为 100。
pub fn progress_percent(received: u64, declared: u64) -> u8 {
    if declared == 0 {
        return 100;
    }

    let received = u128::from(received);
    let declared = u128::from(declared);
    let rounded = (received * 200 + declared) / (declared * 2);
    let mut percent = u8::try_from(rounded.min(100)).unwrap_or(100);

    if received < declared && percent == 100 {
        percent = 99;
    }
    percent
}

/// 分块解码器
///
/// 独占当前文件的分块缓冲区。
#[derive(Default)]
pub struct ChunkDecoder {
    options: DecoderOptions,
    current: Option<Accumulation>,
}

impl ChunkDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            current: None,
        }
    }

    pub fn state(&self) -> DecoderState {
        if self.current.is_some() {
            DecoderState::Accumulating
        } else {
            DecoderState::Idle
        }
    }

    /// 当前文件名及进度
    pub fn current_progress(&self) -> Option<(&str, u8)> {
        self.current
            .as_ref()
            .map(|acc| (acc.metadata.file_name.as_str(), acc.percent))
    }

    /// 处理一条消息
    pub fn dispatch(&mut self, message: WireMessage) -> Result<Vec<DecodeOutcome>, DecodeError> {
        match message {
            WireMessage::Metadata(metadata) => Ok(self.start(metadata)),
            WireMessage::Chunk(data) => Ok(self.append(data)),
            WireMessage::Terminal => self.finish(),
            WireMessage::SessionEnd => Ok(vec![DecodeOutcome::SessionEnd]),
            WireMessage::Ack(ack) => Ok(vec![DecodeOutcome::Ack(ack)]),
        }
    }

    /// 放弃当前文件（连接关闭时调用），返回其名称和最后进度
    pub fn abandon(&mut self) -> Option<(String, u8)> {
        self.current.take().map(|acc| {
            debug!(
                "Abandoning {} at {}% ({} bytes buffered)",
                acc.metadata.file_name, acc.percent, acc.received
            );
            (acc.metadata.file_name, acc.percent)
        })
    }

    fn start(&mut self, metadata: FileMetadata) -> Vec<DecodeOutcome> {
        let mut outcomes = Vec::new();

        if let Some((name, percent)) = self.abandon() {
            warn!(
                "Metadata for {} arrived before {} finished, discarding partial data",
                metadata.file_name, name
            );
            outcomes.push(DecodeOutcome::Abandoned { name, percent });
        }

        debug!(
            "Receiving {} ({} bytes)",
            metadata.file_name, metadata.file_size
        );
        outcomes.push(DecodeOutcome::Started(FileSummary {
            id: metadata.uuid.clone(),
            name: metadata.file_name.clone(),
            size: metadata.file_size,
            mime_type: metadata.file_type.clone(),
        }));

        let mut acc = Accumulation {
            metadata,
            chunks: Vec::new(),
            received: 0,
            percent: 0,
        };
        if acc.metadata.file_size == 0 {
            acc.percent = 100;
            outcomes.push(DecodeOutcome::Progress {
                name: acc.metadata.file_name.clone(),
                percent: 100,
            });
        }
        self.current = Some(acc);

        outcomes
    }

    fn append(&mut self, data: Vec<u8>) -> Vec<DecodeOutcome> {
        let Some(acc) = self.current.as_mut() else {
            warn!("Chunk of {} bytes without metadata, ignored", data.len());
            return vec![DecodeOutcome::Ignored("chunk without metadata")];
        };

        acc.received += data.len() as u64;
        acc.chunks.push(data);
        acc.percent = progress_percent(acc.received, acc.metadata.file_size);

        vec![DecodeOutcome::Progress {
            name: acc.metadata.file_name.clone(),
            percent: acc.percent,
        }]
    }

    fn finish(&mut self) -> Result<Vec<DecodeOutcome>, DecodeError> {
        let Some(acc) = self.current.take() else {
            warn!("End marker without metadata, ignored");
            return Ok(vec![DecodeOutcome::Ignored("end marker without metadata")]);
        };

        let declared = acc.metadata.file_size;
        if acc.received != declared {
            if self.options.strict_size {
                return Err(DecodeError::SizeMismatch {
                    name: acc.metadata.file_name,
                    uuid: acc.metadata.uuid,
                    declared,
                    received: acc.received,
                });
            }
            warn!(
                "{} declared {} bytes but {} arrived",
                acc.metadata.file_name, declared, acc.received
            );
        }

        let mut outcomes = Vec::new();
        if acc.percent != 100 {
            outcomes.push(DecodeOutcome::Progress {
                name: acc.metadata.file_name.clone(),
                percent: 100,
            });
        }

        let payload = acc.chunks.concat();
        debug!("Finished {} ({} bytes)", acc.metadata.file_name, payload.len());

        outcomes.push(DecodeOutcome::Completed(ReceivedFile {
            name: acc.metadata.file_name,
            mime_type: acc.metadata.file_type,
            uuid: acc.metadata.uuid,
            declared_size: declared,
            payload,
        }));
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str, size: u64) -> WireMessage {
        WireMessage::Metadata(FileMetadata::new(name, size))
    }

    fn progress_of(outcomes: &[DecodeOutcome]) -> Vec<u8> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                DecodeOutcome::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 100), 0);
        assert_eq!(progress_percent(65_536, 153_600), 43);
        assert_eq!(progress_percent(131_072, 153_600), 85);
        assert_eq!(progress_percent(153_600, 153_600), 100);
        assert_eq!(progress_percent(0, 0), 100);
        // 未收齐时不报告 100
        assert_eq!(progress_percent(999, 1000), 99);
        // 超出声明大小时封顶
        assert_eq!(progress_percent(5000, 1000), 100);
    }

    #[test]
    fn test_150k_progress_sequence() {
        let mut decoder = ChunkDecoder::default();
        let mut events = decoder.dispatch(metadata("cat.png", 150 * 1024)).unwrap();
        assert_eq!(decoder.state(), DecoderState::Accumulating);

        for size in [65_536, 65_536, 22 * 1024] {
            events.extend(decoder.dispatch(WireMessage::Chunk(vec![1u8; size])).unwrap());
        }
        assert_eq!(progress_of(&events), vec![43, 85, 100]);

        let done = decoder.dispatch(WireMessage::Terminal).unwrap();
        assert_eq!(decoder.state(), DecoderState::Idle);
        match done.as_slice() {
            [DecodeOutcome::Completed(file)] => {
                assert_eq!(file.name, "cat.png");
                assert_eq!(file.len(), 150 * 1024);
                assert!(!file.size_mismatch());
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn test_reassembles_in_arrival_order() {
        let mut decoder = ChunkDecoder::default();
        decoder.dispatch(metadata("a.bin", 6)).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![1, 2])).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![3, 4, 5])).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![6])).unwrap();

        let done = decoder.dispatch(WireMessage::Terminal).unwrap();
        let Some(DecodeOutcome::Completed(file)) = done.last() else {
            panic!("file not completed");
        };
        assert_eq!(file.payload, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_zero_byte_file() {
        let mut decoder = ChunkDecoder::default();
        let started = decoder.dispatch(metadata("empty.png", 0)).unwrap();
        assert_eq!(progress_of(&started), vec![100]);

        let done = decoder.dispatch(WireMessage::Terminal).unwrap();
        assert_eq!(progress_of(&done), Vec::<u8>::new());
        assert!(matches!(done.as_slice(), [DecodeOutcome::Completed(f)] if f.is_empty()));
    }

    #[test]
    fn test_second_metadata_discards_partial() {
        let mut decoder = ChunkDecoder::default();
        decoder.dispatch(metadata("first.png", 100)).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![9u8; 40])).unwrap();

        let events = decoder.dispatch(metadata("second.png", 3)).unwrap();
        assert_eq!(
            events[0],
            DecodeOutcome::Abandoned {
                name: "first.png".into(),
                percent: 40
            }
        );
        assert!(matches!(&events[1], DecodeOutcome::Started(s) if s.name == "second.png"));

        decoder.dispatch(WireMessage::Chunk(vec![1, 2, 3])).unwrap();
        let done = decoder.dispatch(WireMessage::Terminal).unwrap();
        let Some(DecodeOutcome::Completed(file)) = done.last() else {
            panic!("file not completed");
        };
        // 不与前一个文件的数据合并
        assert_eq!(file.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_same_name_restart_starts_fresh() {
        let mut decoder = ChunkDecoder::default();
        decoder.dispatch(metadata("x.png", 4)).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![0, 0])).unwrap();
        decoder.dispatch(metadata("x.png", 4)).unwrap();
        assert_eq!(decoder.current_progress(), Some(("x.png", 0)));
    }

    #[test]
    fn test_chunk_and_end_while_idle_are_ignored() {
        let mut decoder = ChunkDecoder::default();
        assert!(matches!(
            decoder.dispatch(WireMessage::Chunk(vec![1])).unwrap().as_slice(),
            [DecodeOutcome::Ignored(_)]
        ));
        assert!(matches!(
            decoder.dispatch(WireMessage::Terminal).unwrap().as_slice(),
            [DecodeOutcome::Ignored(_)]
        ));
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn test_size_mismatch_lenient_and_strict() {
        let mut lenient = ChunkDecoder::default();
        lenient.dispatch(metadata("short.png", 10)).unwrap();
        lenient.dispatch(WireMessage::Chunk(vec![0u8; 4])).unwrap();
        let done = lenient.dispatch(WireMessage::Terminal).unwrap();
        assert_eq!(progress_of(&done), vec![100]);
        let Some(DecodeOutcome::Completed(file)) = done.last() else {
            panic!("file not completed");
        };
        assert!(file.size_mismatch());
        assert_eq!(file.len(), 4);

        let mut strict = ChunkDecoder::new(DecoderOptions { strict_size: true });
        strict.dispatch(metadata("short.png", 10)).unwrap();
        strict.dispatch(WireMessage::Chunk(vec![0u8; 4])).unwrap();
        assert!(matches!(
            strict.dispatch(WireMessage::Terminal),
            Err(DecodeError::SizeMismatch {
                declared: 10,
                received: 4,
                ..
            })
        ));
        assert_eq!(strict.state(), DecoderState::Idle);
    }

    #[test]
    fn test_abandon_reports_last_progress() {
        let mut decoder = ChunkDecoder::default();
        decoder.dispatch(metadata("cat.png", 150 * 1024)).unwrap();
        decoder.dispatch(WireMessage::Chunk(vec![0u8; 65_536])).unwrap();

        assert_eq!(decoder.abandon(), Some(("cat.png".to_string(), 43)));
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(decoder.abandon(), None);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut decoder = ChunkDecoder::default();
        decoder.dispatch(metadata("v.mp4", 10_000)).unwrap();

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.extend(progress_of(
                &decoder.dispatch(WireMessage::Chunk(vec![0u8; 999])).unwrap(),
            ));
        }
        seen.extend(progress_of(
            &decoder.dispatch(WireMessage::Chunk(vec![0u8; 10])).unwrap(),
        ));

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(*seen.last().unwrap(), 100);
    }
}
