use crate::request::Command;

/// `NSDEVTYPE_TRACKDISK`.
pub const DEVICE_TYPE_TRACKDISK: u16 = 5;

/// Bytes of the fixed part of the query result, which is what `actual`
/// reports.
pub const QUERY_RESULT_SIZE: u32 = 16;

/// Command codes the device advertises. The 64-bit trackdisk commands are
/// accepted but only their NSD forms are listed.
pub static SUPPORTED_COMMANDS: [u16; 25] = [
    Command::DeviceQuery as u16,
    Command::Reset as u16,
    Command::Read as u16,
    Command::Write as u16,
    Command::Update as u16,
    Command::Clear as u16,
    Command::Start as u16,
    Command::Stop as u16,
    Command::Flush as u16,
    Command::Motor as u16,
    Command::Seek as u16,
    Command::Format as u16,
    Command::Remove as u16,
    Command::ChangeNum as u16,
    Command::ChangeState as u16,
    Command::ProtStatus as u16,
    Command::GetDriveType as u16,
    Command::GetGeometry as u16,
    Command::AddChangeInt as u16,
    Command::RemChangeInt as u16,
    Command::ScsiCmd as u16,
    Command::NsRead64 as u16,
    Command::NsWrite64 as u16,
    Command::NsSeek64 as u16,
    Command::NsFormat64 as u16,
];

/// Answer to `NSCMD_DEVICEQUERY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceQueryResult {
    pub dev_query_format: u32,
    pub size_available: u32,
    pub device_type: u16,
    pub device_sub_type: u16,
    pub supported_commands: &'static [u16],
}

pub fn device_query() -> DeviceQueryResult {
    DeviceQueryResult {
        dev_query_format: 0,
        size_available: QUERY_RESULT_SIZE,
        device_type: DEVICE_TYPE_TRACKDISK,
        device_sub_type: 0,
        supported_commands: &SUPPORTED_COMMANDS,
    }
}
