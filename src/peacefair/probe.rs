use log::{debug, error, info};
use rmodbus::{client::ModbusRequest, guess_response_frame_len, ModbusProto};
use thiserror::Error;

use crate::config::MeterConfig;
use crate::serial::{self, Transport, TransportError};

/// First register and count read to see whether the meter talks to us
pub const PROBE_START_REGISTER: u16 = 0;
pub const PROBE_REGISTER_COUNT: u16 = 8;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("modbus error: {0}")]
    Modbus(String),
    #[error("meter did not answer, got {0} byte(s)")]
    NoResponse(usize),
}

/// Opens a session of its own and reads the first input registers of the meter
pub async fn test_connection(meter: &MeterConfig) -> Result<Vec<u16>, ProbeError> {
    let mut session = serial::open(&meter.serial)?;
    let res = read_input_registers(&mut session, meter.address, PROBE_START_REGISTER, PROBE_REGISTER_COUNT).await;

    match &res {
        Ok(regs) => info!("Meter {} answered on {}: {:04X?}", meter.name, meter.serial.port, regs),
        Err(e) => error!("Meter {} did not answer on {}: {}", meter.name, meter.serial.port, e),
    }
    return res;
}

pub async fn read_input_registers<T: Transport + ?Sized>(
    transport: &mut T,
    address: u8,
    register: u16,
    count: u16,
) -> Result<Vec<u16>, ProbeError> {
    let mut mreq = ModbusRequest::new(address, ModbusProto::Rtu);
    let mut request = Vec::new();
    mreq.generate_get_inputs(register, count, &mut request)
        .map_err(|e| ProbeError::Modbus(format!("unable to build request: {:?}", e)))?;

    debug!("Sending probe {}", hex::encode_upper(&request));
    transport.write(&request).await?;

    /* address, function and byte count (or exception code) tell us the remaining length */
    let mut response = transport.read_up_to(3).await?;
    if response.len() < 3 {
        return Err(ProbeError::NoResponse(response.len()));
    }

    let len = guess_response_frame_len(&response, ModbusProto::Rtu)
        .map_err(|e| ProbeError::Modbus(format!("unable to determine response length: {:?}", e)))? as usize;

    if len > response.len() {
        let rest = transport.read_up_to(len - response.len()).await?;
        response.extend(rest);
    }
    debug!("Probe response {}", hex::encode_upper(&response));

    let mut data = Vec::new();
    mreq.parse_u16(&response, &mut data)
        .map_err(|e| ProbeError::Modbus(format!("invalid response: {:?}", e)))?;

    return Ok(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peacefair::crc::checksum;
    use crate::peacefair::exchange::tests::ScriptedTransport;

    fn rtu(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&checksum(payload));
        return frame;
    }

    #[tokio::test]
    async fn test_reads_registers() {
        /* 230.0 V, 1.234 A split over two registers */
        let answer = rtu(&[0x01, 0x04, 0x06, 0x08, 0xFC, 0x04, 0xD2, 0x00, 0x00]);
        let mut transport = ScriptedTransport::new(vec![answer[..3].to_vec(), answer[3..].to_vec()]);

        let regs = read_input_registers(&mut transport, 1, 0, 3).await.unwrap();
        assert_eq!(regs, vec![0x08FC, 0x04D2, 0x0000]);
        assert_eq!(transport.written, vec![rtu(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x03])]);
    }

    #[tokio::test]
    async fn test_silent_meter() {
        let mut transport = ScriptedTransport::new(vec![]);
        let res = read_input_registers(&mut transport, 1, 0, 8).await;
        assert!(matches!(res, Err(ProbeError::NoResponse(0))));
    }

    #[tokio::test]
    async fn test_exception_response() {
        let answer = rtu(&[0x01, 0x84, 0x02]);
        let mut transport = ScriptedTransport::new(vec![answer[..3].to_vec(), answer[3..].to_vec()]);

        let res = read_input_registers(&mut transport, 1, 0, 8).await;
        assert!(matches!(res, Err(ProbeError::Modbus(_))));
    }

    #[tokio::test]
    async fn test_missing_port() {
        let meter = MeterConfig::with_port("test", "/dev/does-not-exist-pf2m");
        let res = test_connection(&meter).await;
        assert!(matches!(res, Err(ProbeError::Transport(TransportError::Open { .. }))));
    }
}
