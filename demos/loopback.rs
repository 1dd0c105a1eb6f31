use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::{Level, LevelFilter, log};
use lorawan_link_lib::{
    CommunicationManager, ConnectionState, DownlinkPoll, EchoTransport, JoinCredentials, LinkConfiguration, LinkRunner, DOWNLINK_PAYLOAD_SIZE,
};

#[embassy_executor::task]
async fn link_task(runner: LinkRunner<'static, EchoTransport>) -> ! {
    runner.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Debug).init();

    // Shortened timing so the loopback is visible within seconds
    let mut config = LinkConfiguration::new(JoinCredentials::new("06EB704DA820830B830E0DE331380D5E", "70B3D57ED0037C11"));
    config.send_interval = Duration::from_secs(5);
    config.poll_interval = Duration::from_secs(5);
    config.tick = Duration::from_secs(1);
    config.join_settle_delay = Duration::from_millis(500);
    config.downlink_poll = DownlinkPoll::PollFrame {
        listen_delay: Duration::from_millis(200),
    };

    let manager: &'static CommunicationManager = Box::leak(Box::new(CommunicationManager::new(config)));
    let runner = match manager.enable(EchoTransport::new()) {
        Ok(runner) => runner,
        Err(err) => {
            log!(Level::Error, "Failed to enable communication manager: {}", err);
            return;
        }
    };
    if let Err(err) = spawner.spawn(link_task(runner)) {
        log!(Level::Error, "Failed to spawn link task: {:?}", err);
        return;
    }

    let mut reading: u32 = 0;
    let mut buffer = [0u8; DOWNLINK_PAYLOAD_SIZE];
    loop {
        if manager.status() == ConnectionState::Connected {
            let payload = format!("{{\"sensor\":\"ultrasonic\",\"distance_cm\":{}}}", 120 + reading % 40);
            if !manager.send(payload.as_bytes()) {
                log!(Level::Warn, "Reading {} too large for one uplink", reading);
            }
            reading += 1;
        } else {
            log!(Level::Info, "Link state: {:?}", manager.status());
        }

        while let Some(length) = manager.receive(&mut buffer) {
            let shown = length.min(buffer.len());
            log!(Level::Info, "Downlink ({} bytes): {}", length, String::from_utf8_lossy(&buffer[..shown]));
        }

        let stats = manager.statistics();
        log!(
            Level::Debug,
            "sent: {}, received: {}, dropped: {}, queued: {}",
            stats.frames_sent,
            stats.downlinks_received,
            stats.uplinks_dropped,
            manager.pending_uplinks()
        );
        Timer::after(Duration::from_secs(2)).await;
    }
}
