//! A single C-ECHO exchange with a remote application entity.
//!
//! The exchange goes through association negotiation,
//! one C-ECHO request, and its response,
//! all within a fixed deadline.
//! Whichever finishes first, the exchange or the deadline,
//! decides the [`EchoOutcome`].
use std::time::Duration;

use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{mem::InMemDicomObject, StandardDataDictionary};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom_ul::{
    association::client::ClientAssociationOptions,
    pdu::{PDataValue, PDataValueType, Pdu},
    ClientAssociation,
};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

/// Command field value of a C-ECHO-RQ
const C_ECHO_RQ: u16 = 0x0030;
/// Command data set type value meaning no data set follows
const NO_DATA_SET: u16 = 0x0101;

#[derive(Debug, Snafu)]
pub enum Error {
    /// Could not establish association with SCP
    InitScu {
        source: dicom_ul::association::client::Error,
    },

    /// No presentation context accepted for the Verification SOP class
    NoPresentationContext,

    /// Failed to send C-ECHO-RQ
    SendRequest {
        source: dicom_ul::association::client::Error,
    },

    /// Failed to receive C-ECHO-RSP
    ReceiveResponse {
        source: dicom_ul::association::client::Error,
    },

    #[snafu(display("unexpected SCP response: {:?}", pdu))]
    UnexpectedPdu { pdu: Box<Pdu> },

    #[snafu(whatever, display("{}", message))]
    Other {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + 'static>, Some)))]
        source: Option<Box<dyn std::error::Error + 'static>>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The remote node to verify and how to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoTarget {
    /// host name or IP address of the SCP
    pub host: String,
    /// TCP port of the SCP
    pub port: u16,
    /// the calling AE title (this node)
    pub calling_ae_title: String,
    /// the called AE title (the SCP)
    pub called_ae_title: String,
}

impl EchoTarget {
    /// The socket address to connect to,
    /// with IPv6 literals in brackets.
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Fixed tuning of the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoOptions {
    /// deadline for associating and receiving the C-ECHO response
    pub timeout: Duration,
    /// the C-ECHO message ID
    pub message_id: u16,
    /// the maximum PDU length accepted by this node
    pub max_pdu_length: u32,
}

impl Default for EchoOptions {
    fn default() -> Self {
        EchoOptions {
            timeout: Duration::from_millis(5000),
            message_id: 1,
            max_pdu_length: 16384,
        }
    }
}

/// How the verification ended.
#[derive(Debug)]
pub enum EchoOutcome {
    /// a C-ECHO-RSP was received with this status code
    Succeeded { status: u16 },
    /// the deadline elapsed before a response came
    TimedOut,
    /// the exchange failed before producing a response
    Aborted(Error),
}

/// Verify connectivity to the target with one C-ECHO request.
///
/// After a response, the association is released gracefully.
/// A failed release is only logged.
pub async fn echo(target: &EchoTarget, options: &EchoOptions) -> EchoOutcome {
    let (association, status) =
        match tokio::time::timeout(options.timeout, exchange(target, options)).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return EchoOutcome::Aborted(e),
            Err(_) => {
                warn!(
                    "No response from {} within {} ms",
                    target.socket_address(),
                    options.timeout.as_millis()
                );
                return EchoOutcome::TimedOut;
            }
        };

    match tokio::time::timeout(options.timeout, association.release()).await {
        Ok(Ok(())) => debug!("Association released"),
        Ok(Err(e)) => warn!(
            "Failed to release association: {}",
            snafu::Report::from_error(e)
        ),
        Err(_) => warn!("Association release timed out"),
    }

    EchoOutcome::Succeeded { status }
}

/// Associate, send the C-ECHO-RQ and wait for its response.
async fn exchange(
    target: &EchoTarget,
    options: &EchoOptions,
) -> Result<(ClientAssociation<TcpStream>, u16)> {
    let addr = target.socket_address();
    debug!("Establishing association with '{}'...", addr);

    let mut association = ClientAssociationOptions::new()
        .with_abstract_syntax(uids::VERIFICATION)
        .calling_ae_title(target.calling_ae_title.as_str())
        .called_ae_title(target.called_ae_title.as_str())
        .max_pdu_length(options.max_pdu_length)
        .establish_with_async(&addr)
        .await
        .context(InitScuSnafu)?;

    let pc_id = association
        .presentation_contexts()
        .first()
        .context(NoPresentationContextSnafu)?
        .id;
    debug!("Association established, presentation context {}", pc_id);

    // commands are always in implicit VR LE
    let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();

    let cmd = create_echo_command(options.message_id);
    let mut data = Vec::with_capacity(128);
    cmd.write_dataset_with_ts(&mut data, &ts)
        .whatever_context("Could not write C-ECHO-RQ command")?;

    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data,
            }],
        })
        .await
        .context(SendRequestSnafu)?;

    debug!(
        "Echo message sent (msg id {}), awaiting reply...",
        options.message_id
    );

    let pdu = association.receive().await.context(ReceiveResponseSnafu)?;

    let data = match pdu {
        Pdu::PData { data } => data,
        pdu => {
            let _ = association.abort().await;
            return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
        }
    };

    let data_value = data
        .first()
        .whatever_context("C-ECHO-RSP carries no data")?;
    let obj = InMemDicomObject::read_dataset_with_ts(&data_value.data[..], &ts)
        .whatever_context("Could not read response from SCP")?;
    debug!("Full response: {:?}", obj);

    let status = obj
        .element(tags::STATUS)
        .whatever_context("Could not find status code in response")?
        .to_int::<u16>()
        .whatever_context("Status code in response is not a valid integer")?;

    let responded_to = obj
        .element(tags::MESSAGE_ID_BEING_RESPONDED_TO)
        .ok()
        .and_then(|e| e.to_int::<u16>().ok());
    if responded_to != Some(options.message_id) {
        warn!(
            "Response does not match message ID {} (got {:?})",
            options.message_id, responded_to
        );
    }

    log_status(status);

    Ok((association, status))
}

fn log_status(status: u16) {
    match status {
        0 => debug!("C-ECHO status code: {} (success)", status),
        1 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => {
            warn!("C-ECHO status code: {} ({:04X}H, warning)", status, status)
        }
        _ => error!("C-ECHO status code: {} ({:04X}H, failure)", status, status),
    }
}

fn create_echo_command(message_id: u16) -> InMemDicomObject<StandardDataDictionary> {
    InMemDicomObject::command_from_element_iter([
        // service
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, uids::VERIFICATION),
        ),
        // command
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_ECHO_RQ])),
        // message ID
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        // data set type
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [NO_DATA_SET]),
        ),
    ])
}
