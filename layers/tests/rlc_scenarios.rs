//! End-to-end RLC scenarios: two RLC instances joined by an emulated MAC

use bytes::Bytes;
use common::Lcid;
use interfaces::rlc::SduQueue;
use layers::rlc::pdu::{decode, RlcPdu, StatusPdu};
use layers::rlc::{
    AmConfig, EntityState, ReestablishReport, Rlc, RlcConfig, RlcEntity, RlcError, SnFieldLength,
    UmConfig,
};
use layers::ProtocolLayer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LCID: Lcid = Lcid(4);

struct Link {
    tx: Rlc,
    rx: Rlc,
    tx_upper: Arc<SduQueue>,
    rx_upper: Arc<SduQueue>,
}

impl Link {
    async fn new(config: RlcConfig) -> Self {
        let tx_upper = Arc::new(SduQueue::new());
        let rx_upper = Arc::new(SduQueue::new());
        let mut tx = Rlc::new(tx_upper.clone());
        let mut rx = Rlc::new(rx_upper.clone());
        tx.initialize().await.unwrap();
        rx.initialize().await.unwrap();
        tx.add_bearer(LCID, config.clone()).unwrap();
        rx.add_bearer(LCID, config).unwrap();
        Self { tx, rx, tx_upper, rx_upper }
    }

    /// One MAC round: one opportunity per direction, then a 1 ms tick.
    /// `drop_down` decides whether a PDU from `tx` to `rx` is lost.
    fn round(&self, opportunity: usize, mut drop_down: impl FnMut(&Bytes) -> bool) {
        if let Some(pdu) = self.tx.read_pdu(LCID, opportunity) {
            if !drop_down(&pdu) {
                self.rx.write_pdu(LCID, pdu);
            }
        }
        if let Some(pdu) = self.rx.read_pdu(LCID, opportunity) {
            self.tx.write_pdu(LCID, pdu);
        }
        self.tx.tick(1);
        self.rx.tick(1);
    }

    fn run(&self, rounds: usize, opportunity: usize) {
        for _ in 0..rounds {
            self.round(opportunity, |_| false);
        }
    }

    fn am_tx(&self) -> Arc<RlcEntity> {
        self.tx.entity(LCID).unwrap()
    }
}

fn data_sn(pdu: &Bytes) -> Option<u16> {
    match decode(pdu, 10) {
        Ok(RlcPdu::Data(data)) => Some(data.header.sn),
        _ => None,
    }
}

fn sdu(tag: u8, len: usize) -> Bytes {
    Bytes::from(vec![tag; len])
}

#[tokio::test]
async fn test_am_lossless_segmented() {
    let link = Link::new(RlcConfig::default_am()).await;
    let sdus = vec![sdu(1, 100), sdu(2, 200), sdu(3, 50)];
    for s in &sdus {
        link.tx.write_sdu(LCID, s.clone()).unwrap();
    }

    link.run(50, 80);

    assert_eq!(link.rx_upper.delivered_on(LCID), sdus);
    let metrics = link.tx.metrics(LCID).unwrap();
    assert_eq!(metrics.num_retx_pdus, 0);
    assert_eq!(metrics.num_tx_sdus, 3);
    assert_eq!(link.tx.window_state(LCID).unwrap().tx_base, 3);
}

#[tokio::test]
async fn test_am_single_loss_retransmitted() {
    let link = Link::new(RlcConfig::default_am()).await;
    let sdus: Vec<Bytes> = (0..6).map(|i| sdu(i, 50)).collect();
    for s in &sdus {
        link.tx.write_sdu(LCID, s.clone()).unwrap();
    }

    let entity = link.am_tx();
    let RlcEntity::Am(am) = entity.as_ref() else {
        panic!("expected an AM bearer");
    };

    let mut dropped = false;
    let mut max_retx_of_3 = 0;
    for _ in 0..100 {
        link.round(80, |pdu| {
            if !dropped && data_sn(pdu) == Some(3) {
                dropped = true;
                return true;
            }
            false
        });
        max_retx_of_3 = max_retx_of_3.max(am.retx_count(3).unwrap_or(0));
    }

    assert!(dropped);
    assert_eq!(max_retx_of_3, 1);
    assert_eq!(link.rx_upper.delivered_on(LCID), sdus);
    assert!(link.tx.metrics(LCID).unwrap().num_retx_pdus >= 1);
    assert_eq!(link.tx.state(LCID), Ok(EntityState::Active));
}

#[tokio::test]
async fn test_am_max_retx_fails_bearer_once() {
    let config = AmConfig { max_retx_thresh: 2, ..AmConfig::default() };
    let link = Link::new(RlcConfig::Am(config.clone())).await;
    for i in 0..3 {
        link.tx.write_sdu(LCID, sdu(i, 40)).unwrap();
    }

    for _ in 0..300 {
        link.round(80, |pdu| data_sn(pdu) == Some(1));
    }

    assert_eq!(link.tx.state(LCID), Ok(EntityState::Failed));
    assert_eq!(link.tx_upper.max_retx_notifications(), vec![LCID]);
    assert_eq!(
        link.tx.write_sdu(LCID, sdu(9, 10)),
        Err(RlcError::ChannelFailed(LCID))
    );
    assert_eq!(
        link.tx.reestablish_bearer(LCID),
        Err(RlcError::ChannelFailed(LCID))
    );
    // SN 0 got through; nothing after the stuck SN may be delivered
    assert_eq!(link.rx_upper.delivered_on(LCID), vec![sdu(0, 40)]);

    // A failed bearer is recreated, not revived
    link.tx.add_bearer(LCID, RlcConfig::Am(config)).unwrap();
    assert_eq!(link.tx.state(LCID), Ok(EntityState::Active));
}

#[tokio::test]
async fn test_um_reordering_skip_and_late_delivery() {
    let link = Link::new(RlcConfig::default_um()).await;
    for i in 0..3 {
        link.tx.write_sdu(LCID, sdu(i, 20)).unwrap();
    }
    let pdus: Vec<Bytes> = (0..3).map(|_| link.tx.read_pdu(LCID, 100).unwrap()).collect();

    link.rx.write_pdu(LCID, pdus[0].clone());
    link.rx.write_pdu(LCID, pdus[2].clone());
    assert_eq!(link.rx_upper.num_delivered(), 1);

    // SN 1 arrives only after t-Reordering expired
    link.rx.tick(5);
    link.rx.write_pdu(LCID, pdus[1].clone());

    assert_eq!(
        link.rx_upper.delivered_on(LCID),
        vec![sdu(0, 20), sdu(2, 20), sdu(1, 20)]
    );
    let metrics = link.rx.metrics(LCID).unwrap();
    assert_eq!(metrics.num_lost_sdus, 1);
    assert_eq!(metrics.num_late_sdus, 1);
}

#[tokio::test]
async fn test_am_reestablish_requeues_unacked() {
    let link = Link::new(RlcConfig::default_am()).await;
    let sdus: Vec<Bytes> = (0..5).map(|i| sdu(i, 30)).collect();
    for s in &sdus {
        link.tx.write_sdu(LCID, s.clone()).unwrap();
    }
    for _ in 0..5 {
        link.tx.read_pdu(LCID, 100).unwrap();
    }
    link.tx.write_pdu(LCID, StatusPdu { ack_sn: 2, nacks: vec![] }.encode());
    assert_eq!(link.tx.window_state(LCID).unwrap().tx_base, 2);

    let report = link.tx.reestablish_bearer(LCID).unwrap();
    assert_eq!(report, ReestablishReport { requeued_sdus: 3, discarded_sdus: 0 });
    link.rx.reestablish_bearer(LCID).unwrap();
    for rlc in [&link.tx, &link.rx] {
        let window = rlc.window_state(LCID).unwrap();
        assert_eq!((window.tx_base, window.tx_next, window.rx_base), (0, 0, 0));
    }

    link.run(50, 100);
    assert_eq!(link.rx_upper.delivered_on(LCID), sdus[2..].to_vec());
}

#[tokio::test]
async fn test_um_reestablish_discards() {
    let link = Link::new(RlcConfig::default_um()).await;
    for i in 0..5 {
        link.tx.write_sdu(LCID, sdu(i, 30)).unwrap();
    }
    for _ in 0..2 {
        let pdu = link.tx.read_pdu(LCID, 100).unwrap();
        link.rx.write_pdu(LCID, pdu);
    }

    let report = link.tx.reestablish_bearer(LCID).unwrap();
    assert_eq!(report, ReestablishReport { requeued_sdus: 0, discarded_sdus: 3 });
    link.rx.reestablish_bearer(LCID).unwrap();
    assert_eq!(link.tx.buffer_state(LCID), 0);
    assert_eq!(link.rx.window_state(LCID).unwrap().rx_base, 0);

    link.run(20, 100);
    assert_eq!(link.rx_upper.delivered_on(LCID), vec![sdu(0, 30), sdu(1, 30)]);
}

#[tokio::test]
async fn test_replayed_pdu_not_redelivered() {
    let link = Link::new(RlcConfig::default_am()).await;
    link.tx.write_sdu(LCID, sdu(7, 10)).unwrap();
    let pdu = link.tx.read_pdu(LCID, 100).unwrap();

    link.rx.write_pdu(LCID, pdu.clone());
    link.run(20, 100);
    link.rx.write_pdu(LCID, pdu);

    assert_eq!(link.rx_upper.delivered_on(LCID), vec![sdu(7, 10)]);
    assert!(link.rx.metrics(LCID).unwrap().num_dropped_duplicates >= 1);
}

#[tokio::test]
async fn test_status_deferred_by_prohibit_timer() {
    let config = AmConfig { t_status_prohibit: 20, ..AmConfig::default() };
    let link = Link::new(RlcConfig::Am(config)).await;

    link.tx.write_sdu(LCID, sdu(1, 10)).unwrap();
    link.rx.write_pdu(LCID, link.tx.read_pdu(LCID, 100).unwrap());
    assert!(link.rx.read_pdu(LCID, 100).is_some());

    link.tx.write_sdu(LCID, sdu(2, 10)).unwrap();
    link.rx.write_pdu(LCID, link.tx.read_pdu(LCID, 100).unwrap());
    assert_eq!(link.rx.read_pdu(LCID, 100), None);

    link.rx.tick(20);
    let status = link.rx.read_pdu(LCID, 100).unwrap();
    match decode(&status, 10) {
        Ok(RlcPdu::Status(status)) => assert_eq!(status.ack_sn, 2),
        other => panic!("expected STATUS, got {:?}", other),
    }
}

#[tokio::test]
async fn test_am_lossy_link_soak() {
    let config = AmConfig { max_retx_thresh: 32, ..AmConfig::default() };
    let link = Link::new(RlcConfig::Am(config)).await;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let sdus: Vec<Bytes> = (0..200u32)
        .map(|i| {
            let mut data = i.to_be_bytes().to_vec();
            data.resize(rng.gen_range(4..600), i as u8);
            Bytes::from(data)
        })
        .collect();
    let mut pending = sdus.iter().cloned();

    for _ in 0..20_000 {
        if let Some(s) = pending.next() {
            link.tx.write_sdu(LCID, s).unwrap();
        }
        let opportunity = rng.gen_range(5..300);
        let lost = rng.gen_bool(0.05);
        link.round(opportunity, |_| lost);
        if link.rx_upper.num_delivered() == sdus.len() {
            break;
        }
    }

    assert_eq!(link.tx.state(LCID), Ok(EntityState::Active));
    assert_eq!(link.rx_upper.delivered_on(LCID), sdus);
}

#[tokio::test]
async fn test_am_short_sn_lossy_link_soak() {
    let config = AmConfig {
        sn_field_length: SnFieldLength::Bits5,
        max_retx_thresh: 64,
        ..AmConfig::default()
    };
    let link = Link::new(RlcConfig::Am(config)).await;
    let mut rng = StdRng::seed_from_u64(0x5b17);

    // Ten times the 5-bit SN space, so every SN is reused many times
    let sdus: Vec<Bytes> = (0..320u32)
        .map(|i| {
            let mut data = i.to_be_bytes().to_vec();
            data.resize(rng.gen_range(4..300), i as u8);
            Bytes::from(data)
        })
        .collect();
    let mut pending = sdus.iter().cloned().peekable();

    for _ in 0..50_000 {
        if let Some(s) = pending.peek() {
            if link.tx.write_sdu(LCID, s.clone()).is_ok() {
                pending.next();
            }
        }
        let opportunity = rng.gen_range(5..200);
        let lost = rng.gen_bool(0.05);
        link.round(opportunity, |_| lost);
        if link.rx_upper.num_delivered() == sdus.len() {
            break;
        }
    }

    assert_eq!(link.tx.state(LCID), Ok(EntityState::Active));
    assert_eq!(link.rx_upper.delivered_on(LCID), sdus);
    assert!(link.tx.metrics(LCID).unwrap().num_retx_pdus > 0);
}

#[tokio::test]
async fn test_reestablish_racing_traffic_recovers() {
    let config = AmConfig { max_retx_thresh: 1_000, ..AmConfig::default() };
    let link = Link::new(RlcConfig::Am(config)).await;
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..200 {
                link.tx.reestablish();
                link.rx.reestablish();
                std::thread::yield_now();
            }
            stop.store(true, Ordering::Release);
        });

        let mut tag = 0u8;
        while !stop.load(Ordering::Acquire) {
            let _ = link.tx.write_sdu(LCID, sdu(tag, 20 + tag as usize % 100));
            tag = tag.wrapping_add(1);
            link.round(60, |_| false);
        }
    });

    // PDUs caught mid-flight may have left stale data behind; a quiet
    // reestablishment clears it. Requeued SDUs are drained before the check.
    link.tx.reestablish();
    link.rx.reestablish();
    for _ in 0..20_000 {
        link.round(200, |_| false);
        if link.tx.buffer_state(LCID) == 0 && link.rx.buffer_state(LCID) == 0 {
            break;
        }
    }
    link.run(50, 200);
    link.rx_upper.take_delivered();

    let fresh: Vec<Bytes> = (0..20).map(|i| sdu(0xa0 + i, 150)).collect();
    for s in &fresh {
        link.tx.write_sdu(LCID, s.clone()).unwrap();
    }
    link.run(200, 100);

    for rlc in [&link.tx, &link.rx] {
        assert_eq!(rlc.state(LCID), Ok(EntityState::Active));
    }
    let delivered: Vec<Bytes> = link.rx_upper.take_delivered().into_iter().map(|(_, sdu)| sdu).collect();
    assert_eq!(delivered, fresh);
}

#[tokio::test]
async fn test_um_lossy_link_never_duplicates() {
    let link = Link::new(RlcConfig::Um(UmConfig::default())).await;
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..300u32 {
        let mut data = i.to_be_bytes().to_vec();
        data.resize(rng.gen_range(4..200), 0);
        link.tx.write_sdu(LCID, Bytes::from(data)).unwrap();
        let opportunity = rng.gen_range(5..150);
        let lost = rng.gen_bool(0.05);
        link.round(opportunity, |_| lost);
    }
    link.run(2_000, 150);

    let delivered = link.rx_upper.delivered_on(LCID);
    let mut seen = HashSet::new();
    for sdu in &delivered {
        let id = u32::from_be_bytes([sdu[0], sdu[1], sdu[2], sdu[3]]);
        assert!(id < 300);
        assert!(seen.insert(id), "SDU {} delivered twice", id);
    }
    assert!(delivered.len() > 200);
    assert_eq!(link.tx.buffer_state(LCID), 0);
}
