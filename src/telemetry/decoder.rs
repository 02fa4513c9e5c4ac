use std::collections::BTreeMap;

/// Flat field name -> raw value mapping produced from one inbound line.
pub type TelemetryUpdate = BTreeMap<String, String>;

/// Turns one line from a controller board into a flat update.
///
/// Lines that cannot be decoded yield `None` and are dropped by the reader.
pub trait TelemetryDecoder: Send + Sync{
    fn decode(&self, line: &str) -> Option<TelemetryUpdate>;
}

//sentence kind is the last three characters of the tag, so "$Lever" -> VER,
//"$RudderFeedback" -> ACK, "$EngRap" -> RAP
const SENTENCE_FIELDS: &[(&str, &[&str])] = &[
    ("VER", &["LPS_L_vol", "LPS_R_vol"]),
    ("IND", &["NEUTRAL_LED", "ACTIVE_LED", "SYNC_LED"]),
    ("RAP", &["EngineInstance", "EngineSpeed", "EngineBoostPressure", "EngineTiltTrim"]),
    ("PAR", &["EngineInstance", "TransmissionGear", "OilPressure", "OilTemperature", "DiscreteStatus"]),
    ("DER", &["RudderOrder"]),
    ("ACK", &["RudderFeedback"]),
    ("ODE", &["Pilot_Mode"]),
    ("ING", &["Heading"]),
    ("RSE", &["Course"]),
];

/// Minimal decoder for the boards' `$<tag>,v1,v2,...[*HH]` lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceDecoder;

impl SentenceDecoder{
    pub fn new() -> Self{
        SentenceDecoder
    }

    fn checksum(body: &str) -> u8{
        body.bytes().fold(0u8, |acc, b| acc ^ b)
    }

    fn fields_for(tag: &str) -> Option<&'static [&'static str]>{
        if tag.len() < 3 || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'){
            return None;
        }
        let kind = tag[tag.len() - 3..].to_ascii_uppercase();
        SENTENCE_FIELDS.iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, fields)| *fields)
    }
}

impl TelemetryDecoder for SentenceDecoder{
    fn decode(&self, line: &str) -> Option<TelemetryUpdate>{
        let line = line.trim();
        let line = line.strip_prefix('$').unwrap_or(line);

        let body = match line.split_once('*'){
            Some((body, checksum)) =>{
                let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
                if Self::checksum(body) != expected{
                    log::debug!("dropping sentence with bad checksum: {}", line);
                    return None;
                }
                body
            }
            None => line,
        };

        let (tag, data) = body.split_once(',')?;
        let fields = Self::fields_for(tag)?;

        let update: TelemetryUpdate = fields.iter()
            .zip(data.split(','))
            .map(|(name, value)| (name.to_string(), value.trim().to_string()))
            .collect();

        if update.is_empty(){
            None
        }else{
            Some(update)
        }
    }
}
