//! Write-on-change output stage.

/// Physical output that accepts a discrete or analog value.
pub trait OutputDriver<T> {
    /// Prepares the output before the first write.
    fn begin(&mut self) {}

    /// Drives the output to `value`.
    fn write(&mut self, value: T);
}

/// Desired and last-applied value of one output.
///
/// `set_desired` never touches hardware; [`Actuator::update`] writes only when
/// the desired value differs from what was last applied.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Actuator<T> {
    desired: T,
    applied: T,
}

impl<T> Actuator<T>
where
    T: Copy + PartialEq,
{
    #[must_use]
    pub const fn new(initial: T) -> Self {
        Self {
            desired: initial,
            applied: initial,
        }
    }

    /// Initializes the driver and writes the current desired value unconditionally.
    pub fn begin<D: OutputDriver<T> + ?Sized>(&mut self, driver: &mut D) -> T {
        driver.begin();
        self.apply(driver)
    }

    pub fn set_desired(&mut self, value: T) {
        self.desired = value;
    }

    #[must_use]
    pub const fn desired(&self) -> T {
        self.desired
    }

    #[must_use]
    pub const fn applied(&self) -> T {
        self.applied
    }

    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.desired != self.applied
    }

    /// Writes the desired value and records it as applied.
    pub fn apply<D: OutputDriver<T> + ?Sized>(&mut self, driver: &mut D) -> T {
        driver.write(self.desired);
        self.applied = self.desired;
        self.applied
    }

    /// Applies the desired value only if it changed since the last write.
    pub fn update<D: OutputDriver<T> + ?Sized>(&mut self, driver: &mut D) -> T {
        if self.needs_update() {
            self.apply(driver)
        } else {
            self.applied
        }
    }
}

impl<T: Copy + PartialEq + Default> Default for Actuator<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
