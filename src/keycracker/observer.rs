///Observer for key recovery progress, invoked whenever the current best
///guess for a key byte changes. `position` is the 0-based key byte index.
///
///Implementations must return quickly; they are called from worker threads,
///in Klein's attack while the shared vote table lock is held.
pub trait KeyByteObserver: Send + Sync {
    fn on_byte_found(&self, position: usize, value: u8);
}

///Default observer that ignores all progress.
pub struct NopObserver;

impl KeyByteObserver for NopObserver {
    fn on_byte_found(&self, _position: usize, _value: u8) {}
}
