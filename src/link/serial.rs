use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::config::PortConfig;
use crate::error::{HelmError, Result};
use crate::telemetry::{SentenceDecoder, TelemetryDecoder, TelemetrySnapshot, TelemetrySource};
use super::{CommandLink, LinkOpener};

//boards stall their USB bridge if the input buffer is never drained
pub const INPUT_FLUSH_INTERVAL: Duration = Duration::from_secs(25);
pub const MAX_LINE_LEN: usize = 512;

/// Serial connection to one controller board.
///
/// Writes go straight to the port; a background thread reads lines, decodes
/// them and merges them into the shared snapshot.
pub struct SerialLink{
    name: String,
    port: Mutex<Box<dyn SerialPort>>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink{
    pub fn open(
        config: &PortConfig,
        source: TelemetrySource,
        telemetry: Arc<TelemetrySnapshot>,
        decoder: Arc<dyn TelemetryDecoder>,
    ) -> Result<Self>{
        let port = serialport::new(&config.name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()?;

        let reader_port = port.try_clone()?;
        let running = Arc::new(AtomicBool::new(true));

        let reader = TelemetryReader{
            port: reader_port,
            source,
            telemetry,
            decoder,
            running: Arc::clone(&running),
            rx_buffer: Vec::with_capacity(MAX_LINE_LEN),
            last_flush: Instant::now(),
        };

        let thread_name = format!("telemetry-{}", config.name);
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move ||{
                reader.run_loop();
            })
            .map_err(|source| HelmError::Spawn{ name: thread_name, source })?;

        log::info!("serial port {} opened at {} baud", config.name, config.baud_rate);

        Ok(SerialLink{
            name: config.name.clone(),
            port: Mutex::new(port),
            running,
            reader: Mutex::new(Some(handle)),
        })
    }

    pub fn stop(&self){
        self.running.store(false, Ordering::SeqCst);
        let handle = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle{
            let _ = handle.join();
        }
    }
}

impl CommandLink for SerialLink{
    fn write_token(&self, token: &str) -> Result<()>{
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(token.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn name(&self) -> &str{
        &self.name
    }
}

impl Drop for SerialLink{
    fn drop(&mut self){
        self.stop();
        log::info!("serial port {} closed", self.name);
    }
}

struct TelemetryReader{
    port: Box<dyn SerialPort>,
    source: TelemetrySource,
    telemetry: Arc<TelemetrySnapshot>,
    decoder: Arc<dyn TelemetryDecoder>,
    running: Arc<AtomicBool>,
    rx_buffer: Vec<u8>,
    last_flush: Instant,
}

impl TelemetryReader{
    fn run_loop(mut self){
        let mut read_buf = [0u8; 256];

        while self.running.load(Ordering::SeqCst){
            if self.last_flush.elapsed() >= INPUT_FLUSH_INTERVAL{
                self.last_flush = Instant::now();
                if let Err(e) = self.port.clear(ClearBuffer::Input){
                    log::warn!("input flush failed on {:?}: {}", self.source, e);
                }
                self.rx_buffer.clear();
            }

            match self.port.read(&mut read_buf){
                Ok(n) if n > 0 =>{
                    self.rx_buffer.extend_from_slice(&read_buf[..n]);
                    self.process_buffer();
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) =>{
                    log::error!("serial read error on {:?}: {}", self.source, e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    fn process_buffer(&mut self){
        while let Some(line) = split_line(&mut self.rx_buffer){
            if line.is_empty(){
                continue;
            }
            match self.decoder.decode(&line){
                Some(update) =>{
                    log::trace!("{:?} <- {}", self.source, line);
                    self.telemetry.apply(self.source, update);
                }
                None => log::debug!("{:?} dropped undecodable line {:?}", self.source, line),
            }
        }

        //no terminator in sight, a desynced stream would grow forever
        if self.rx_buffer.len() > MAX_LINE_LEN{
            self.rx_buffer.clear();
        }
    }
}

/// Pops one newline-terminated line off the front of `buffer`.
pub fn split_line(buffer: &mut Vec<u8>) -> Option<String>{
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=pos).collect();
    let line = String::from_utf8_lossy(&raw);
    Some(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Opens real serial ports.
pub struct SerialOpener{
    decoder: Arc<dyn TelemetryDecoder>,
}

impl SerialOpener{
    pub fn new(decoder: Arc<dyn TelemetryDecoder>) -> Self{
        SerialOpener{ decoder }
    }
}

impl Default for SerialOpener{
    fn default() -> Self{
        Self::new(Arc::new(SentenceDecoder::new()))
    }
}

impl LinkOpener for SerialOpener{
    fn open(
        &self,
        port: &PortConfig,
        source: TelemetrySource,
        telemetry: Arc<TelemetrySnapshot>,
    ) -> Result<Arc<dyn CommandLink>>{
        let link = SerialLink::open(port, source, telemetry, Arc::clone(&self.decoder))?;
        Ok(Arc::new(link))
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_split_line(){
        let mut buffer = b"$Lever,2710,2710\r\n$Heading,9".to_vec();
        assert_eq!(split_line(&mut buffer).as_deref(), Some("$Lever,2710,2710"));
        assert_eq!(split_line(&mut buffer), None);
        assert_eq!(buffer, b"$Heading,9".to_vec());

        buffer.extend_from_slice(b"0\n");
        assert_eq!(split_line(&mut buffer).as_deref(), Some("$Heading,90"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_open_missing_port_fails(){
        let config = PortConfig{
            name: "/dev/helm-control-does-not-exist".to_string(),
            baud_rate: 9600,
            timeout_ms: 10,
        };
        let result = SerialOpener::default().open(
            &config,
            TelemetrySource::GearBoard,
            Arc::new(TelemetrySnapshot::new()),
        );
        assert!(result.is_err());
    }
}
