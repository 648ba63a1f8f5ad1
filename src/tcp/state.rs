/// Connection states (RFC 793, p. 21).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    CloseWait,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    /// Both sides have exchanged and acknowledged initial sequence numbers.
    pub fn is_synchronized(&self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent | State::SynRcvd => false,
            State::Established
            | State::CloseWait
            | State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::LastAck
            | State::TimeWait => true,
        }
    }

    /// Inbound payload is delivered to the application in these states.
    pub fn accepts_data(&self) -> bool {
        matches!(self, State::Established | State::FinWait1 | State::FinWait2)
    }

    /// The application may still queue data for sending.
    pub fn can_send(&self) -> bool {
        matches!(
            self,
            State::SynSent | State::SynRcvd | State::Established | State::CloseWait
        )
    }

    /// The peer's FIN has been received.
    pub fn peer_closed(&self) -> bool {
        matches!(
            self,
            State::CloseWait | State::LastAck | State::Closing | State::TimeWait
        )
    }
}
