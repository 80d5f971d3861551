//! Framing over mock IO and real sockets.

use ssp_codec::{Symbol, Value};
use ssp_wire::frame::{Frame, FrameDecoder, FrameProtocol, HexProtocol};
use ssp_wire::link::{Link, LinkIndex, LinkSink, UdpLink};
use ssp_wire::message::{ComponentInfo, Message, ReplyTo};
use ssp_wire::protocol_ontology;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

fn hex() -> Arc<dyn FrameProtocol> {
    Arc::new(HexProtocol::new(protocol_ontology().unwrap()))
}

async fn drain<R: tokio::io::AsyncRead + Unpin>(mut io: R, decoder: &mut FrameDecoder) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut buf = [0u8; 16];
    loop {
        let n = assert_ok!(io.read(&mut buf).await);
        if n == 0 {
            return frames;
        }
        frames.extend(decoder.push(&buf[..n]));
    }
}

#[tokio::test]
async fn test_serial_stream_split_across_reads() {
    let protocol = hex();
    let call = Message::Call {
        reply: Some(ReplyTo { from: 5, tk: 17 }),
        sym: Symbol::new("reboot"),
        arg: Value::Null,
    };
    let cinfo = Message::Cinfo(ComponentInfo::new(77, 0, 0, "imu"));
    let first = protocol.encode(1, &call).unwrap();
    let second = protocol.encode(255, &cinfo).unwrap();

    let (head, tail) = first.split_at(7);
    let mock = tokio_test::io::Builder::new()
        .read(b"\x00\x00bootloader v2\r\n")
        .read(head)
        .read(tail)
        .read(b"0xnothex\n")
        .read(&second)
        .build();

    let mut decoder = FrameDecoder::new(protocol);
    let frames = drain(mock, &mut decoder).await;
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].to, &frames[0].message), (1, &call));
    assert_eq!((frames[1].to, &frames[1].message), (255, &cinfo));
}

struct Forward(mpsc::UnboundedSender<Frame>);

impl LinkSink for Forward {
    fn handle_frame(&self, _link: LinkIndex, frame: Frame) {
        let _ = self.0.send(frame);
    }

    fn link_state_changed(&self, _link: LinkIndex, _online: bool) {}
}

#[tokio::test]
async fn test_udp_link_delivers_datagrams() {
    let receiver = UdpLink::bind(0, 1, hex()).await.unwrap();
    let rx_port = receiver.local_addr().unwrap().port();
    let sender = UdpLink::bind(0, rx_port, hex()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn LinkSink> = Arc::new(Forward(tx));
    receiver.attach(Arc::downgrade(&sink), 2).unwrap();

    let set = Message::Set {
        reply: None,
        map: vec![(Symbol::new("led"), Value::Bool(true))],
    };
    sender.send(42, &set).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.to, 42);
    assert_eq!(frame.message, set);
    receiver.close();
}
