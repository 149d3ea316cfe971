//! The walkthrough driven against the simulated subsystem.
//!
//! Each step issues core requests, pushes the hardware events a real
//! subsystem would produce, and reports every signal its consumers receive.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use beacon_core::mock::{sample_beacon, sample_device, MockGateway};
use beacon_core::{
    channel, BeaconCore, BeaconRegion, ConsumerStream, MacAddress, RegionDescriptor, Signal,
};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::report::Reporter;

/// Proximity UUID of the simulated fleet.
pub const FLEET_UUID: &str = "B9407F30-F5F8-466E-AFF9-25556B57FE6D";

const FIRST_DEVICE: &str = "C4:9C:21:5F:0A:11";
const SECOND_DEVICE: &str = "D0:0D:12:34:56:78";

/// Bound on waiting for any single signal.
const SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives one scenario run.
pub struct Scenario<'a, W> {
    core: &'a BeaconCore,
    gateway: &'a Arc<MockGateway>,
    reporter: &'a mut Reporter<W>,
}

impl<'a, W: Write> Scenario<'a, W> {
    /// Scenario over `core`, whose subsystem is `gateway`.
    pub fn new(
        core: &'a BeaconCore,
        gateway: &'a Arc<MockGateway>,
        reporter: &'a mut Reporter<W>,
    ) -> Self {
        Self {
            core,
            gateway,
            reporter,
        }
    }

    /// Run every step in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a step observes an unexpected signal or output
    /// cannot be written.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.discovery().instrument(info_span!("discovery")).await?;
        self.ranging().instrument(info_span!("ranging")).await?;
        self.monitoring().instrument(info_span!("monitoring")).await?;
        self.connection().instrument(info_span!("connection")).await?;
        info!(records = self.reporter.written(), "scenario finished");
        Ok(())
    }

    async fn discovery(&mut self) -> anyhow::Result<()> {
        let (consumer, mut stream) = channel();
        self.core.start_discovery(consumer);

        let first: MacAddress = FIRST_DEVICE.parse()?;
        let second: MacAddress = SECOND_DEVICE.parse()?;
        self.gateway
            .emit_devices(&[sample_device(&first, -72), sample_device(&second, -64)]);
        self.gateway.emit_devices(&[sample_device(&first, -48)]);

        self.expect_events("discovery", &mut stream, 2).await?;
        self.core.stop_discovery()?;
        self.expect_closed("discovery", &mut stream).await?;

        if let Err(err) = self.core.stop_discovery() {
            self.reporter.rejected("discovery", &err)?;
        }
        Ok(())
    }

    async fn ranging(&mut self) -> anyhow::Result<()> {
        let descriptor = RegionDescriptor::new(FLEET_UUID, Some(1), None);
        let region = BeaconRegion::from_descriptor(&descriptor, false)?;
        let (consumer, mut stream) = channel();
        self.core.start_ranging(&descriptor, consumer)?;

        let mac: MacAddress = FIRST_DEVICE.parse()?;
        self.gateway
            .emit_beacons(&region, &[sample_beacon(&mac, 1, 10, -58)]);
        self.gateway.emit_beacons(
            &region,
            &[sample_beacon(&mac, 1, 10, -66), sample_beacon(&mac, 1, 11, -80)],
        );

        self.expect_events("ranging", &mut stream, 2).await?;
        self.core.stop_ranging(&descriptor)?;
        self.expect_closed("ranging", &mut stream).await?;

        // A late event after stop must not reach anyone.
        self.gateway.emit_beacons(&region, &[]);
        if let Err(err) = self.core.stop_ranging(&descriptor) {
            self.reporter.rejected("ranging", &err)?;
        }
        Ok(())
    }

    async fn monitoring(&mut self) -> anyhow::Result<()> {
        let descriptor = RegionDescriptor::new(FLEET_UUID, Some(1), None);
        let region = BeaconRegion::from_descriptor(&descriptor, false)?;
        let (consumer, mut stream) = channel();
        self.core.start_monitoring(&descriptor, consumer)?;

        self.gateway.emit_entered(&region);
        self.gateway.emit_exited(&region);

        self.expect_events("monitoring", &mut stream, 2).await?;
        self.core.stop_monitoring(&descriptor)?;
        self.expect_closed("monitoring", &mut stream).await
    }

    async fn connection(&mut self) -> anyhow::Result<()> {
        let (consumer, mut stream) = channel();
        self.core.connect_to_device(FIRST_DEVICE, consumer)?;
        self.expect_done("connect", &mut stream).await?;

        let (consumer, mut stream) = channel();
        self.core.write_major(7, consumer)?;
        self.expect_done("write-major", &mut stream).await?;

        // Same value again: the device is read, not written.
        let (consumer, mut stream) = channel();
        self.core.write_major(7, consumer)?;
        self.expect_done("write-major", &mut stream).await?;

        let (consumer, mut stream) = channel();
        self.core
            .write_proximity_uuid("F7826DA6-4FA2-4E98-8024-BC5B71E0893E", consumer)?;
        self.expect_done("write-uuid", &mut stream).await?;

        let (consumer, mut stream) = channel();
        self.core.connect_to_device(SECOND_DEVICE, consumer)?;
        self.expect_done("switch-device", &mut stream).await?;

        let (consumer, mut stream) = channel();
        self.core.disconnect_device(consumer);
        self.expect_done("disconnect", &mut stream).await?;

        let (consumer, _stream) = channel();
        if let Err(err) = self.core.write_minor(3, consumer) {
            self.reporter.rejected("write-minor", &err)?;
        }
        Ok(())
    }

    async fn expect_events<T: Serialize>(
        &mut self,
        step: &str,
        stream: &mut ConsumerStream<T>,
        count: usize,
    ) -> anyhow::Result<()> {
        for _ in 0..count {
            let signal = next_signal(stream).await?;
            self.reporter.signal(step, &signal)?;
            if !signal.is_event() {
                bail!("{step}: expected an event");
            }
        }
        Ok(())
    }

    async fn expect_closed<T: Serialize>(
        &mut self,
        step: &str,
        stream: &mut ConsumerStream<T>,
    ) -> anyhow::Result<()> {
        let signal = next_signal(stream).await?;
        self.reporter.signal(step, &signal)?;
        if !signal.is_closed() {
            bail!("{step}: expected the subscription to close");
        }
        Ok(())
    }

    async fn expect_done<T: Serialize>(
        &mut self,
        step: &str,
        stream: &mut ConsumerStream<T>,
    ) -> anyhow::Result<()> {
        let signal = next_signal(stream).await?;
        self.reporter.signal(step, &signal)?;
        match signal {
            Signal::Done(_) => Ok(()),
            Signal::Error(err) => Err(err).context(format!("{step} failed")),
            _ => bail!("{step}: expected completion"),
        }
    }
}

async fn next_signal<T>(stream: &mut ConsumerStream<T>) -> anyhow::Result<Signal<T>> {
    tokio::time::timeout(SIGNAL_TIMEOUT, stream.recv())
        .await
        .with_context(|| format!("no signal for {} within {SIGNAL_TIMEOUT:?}", stream.id()))?
        .with_context(|| format!("stream of {} ended", stream.id()))
}
