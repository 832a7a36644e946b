use bitflags::bitflags;

bitflags! {
    /// Flags associated with a `Msg` indicating its role or attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// More frames of the same logical message follow this one.
        const MORE = 0b001;
        /// Internal control frame (subscription updates, handshake commands).
        const COMMAND = 0b010;
        /// Frame carries a peer routing identity.
        const IDENTITY = 0b100;
    }
}
