use crate::error::IoError;
use crate::query::DeviceQueryResult;
use crate::scsi::ScsiCmd;

/// Exec device command codes the driver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    Reset = 1,
    Read = 2,
    Write = 3,
    Update = 4,
    Clear = 5,
    Stop = 6,
    Start = 7,
    Flush = 8,
    Motor = 9,
    Seek = 10,
    Format = 11,
    Remove = 12,
    ChangeNum = 13,
    ChangeState = 14,
    ProtStatus = 15,
    GetDriveType = 18,
    AddChangeInt = 20,
    RemChangeInt = 21,
    GetGeometry = 22,
    Read64 = 24,
    Write64 = 25,
    Seek64 = 26,
    Format64 = 27,
    ScsiCmd = 28,
    DeviceQuery = 0x4000,
    NsRead64 = 0xC000,
    NsWrite64 = 0xC001,
    NsSeek64 = 0xC002,
    NsFormat64 = 0xC003,
}

impl Command {
    pub const ALL: [Command; 29] = [
        Command::Reset, Command::Read, Command::Write, Command::Update, Command::Clear,
        Command::Stop, Command::Start, Command::Flush, Command::Motor, Command::Seek,
        Command::Format, Command::Remove, Command::ChangeNum, Command::ChangeState,
        Command::ProtStatus, Command::GetDriveType, Command::AddChangeInt,
        Command::RemChangeInt, Command::GetGeometry, Command::Read64, Command::Write64,
        Command::Seek64, Command::Format64, Command::ScsiCmd, Command::DeviceQuery,
        Command::NsRead64, Command::NsWrite64, Command::NsSeek64, Command::NsFormat64,
    ];
}

impl TryFrom<u16> for Command {
    type Error = IoError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Command::ALL.iter()
            .copied()
            .find(|&command| command as u16 == code)
            .ok_or(IoError::NoCommand)
    }
}

/// `DG_DIRECT_ACCESS`.
pub const DEVICE_DIRECT_ACCESS: u8 = 0;
/// `MEMF_PUBLIC`.
pub const MEMF_PUBLIC: u32 = 1;

/// Answer to `TD_GETGEOMETRY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveGeometry {
    pub sector_size: u32,
    pub total_sectors: u32,
    pub cylinders: u32,
    pub cyl_sectors: u32,
    pub heads: u32,
    pub track_sectors: u32,
    pub buf_mem_type: u32,
    pub device_type: u8,
    pub flags: u8,
}

/// What a request's data pointer refers to.
#[derive(Debug, Default)]
pub enum IoData<'a> {
    #[default]
    None,
    Buffer(&'a mut [u8]),
    Scsi(ScsiCmd<'a>),
    Geometry(&'a mut DriveGeometry),
    DeviceQuery(&'a mut DeviceQueryResult),
}

/// One I/O request. `command` is the raw code so unknown commands can be
/// reported as such.
#[derive(Debug, Default)]
pub struct IoRequest<'a> {
    pub command: u16,
    pub unit: u8,
    pub data: IoData<'a>,
    pub length: u32,
    pub offset: u64,
    pub actual: u32,
    pub error: Option<IoError>,
}

impl<'a> IoRequest<'a> {
    pub fn new(command: u16, unit: u8) -> Self {
        IoRequest {
            command,
            unit,
            ..IoRequest::default()
        }
    }

    pub fn with_command(command: Command, unit: u8) -> Self {
        IoRequest::new(command as u16, unit)
    }

    /// Attach a data buffer, setting `length` to match.
    pub fn buffer(mut self, buffer: &'a mut [u8]) -> Self {
        self.length = buffer.len() as u32;
        self.data = IoData::Buffer(buffer);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn scsi(mut self, cmd: ScsiCmd<'a>) -> Self {
        self.data = IoData::Scsi(cmd);
        self
    }

    pub fn geometry(mut self, geometry: &'a mut DriveGeometry) -> Self {
        self.data = IoData::Geometry(geometry);
        self
    }

    pub fn device_query(mut self, result: &'a mut DeviceQueryResult) -> Self {
        self.data = IoData::DeviceQuery(result);
        self
    }

    /// Mark the request as cancelled before it is performed.
    pub fn abort(&mut self) {
        self.error = Some(IoError::Aborted);
    }

    /// The SCSI command this request carries, if any.
    pub fn scsi_cmd(&self) -> Option<&ScsiCmd<'a>> {
        match &self.data {
            IoData::Scsi(cmd) => Some(cmd),
            _ => None,
        }
    }
}
