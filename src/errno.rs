//! Status codes surfaced through the control attribute.

/// I/O error.
pub const EIO: i32 = 5;

/// Out of memory.
pub const ENOMEM: i32 = 12;

/// No such device.
pub const ENODEV: i32 = 19;

/// Invalid argument.
pub const EINVAL: i32 = 22;

/// Describe a negative status returned by the control attribute.
pub fn describe(status: i32) -> String {
    match status.wrapping_neg() {
        EINVAL => String::from("invalid argument"),
        ENOMEM => String::from("out of memory"),
        ENODEV => String::from("device not present"),
        EIO => String::from("I/O failure"),
        _ => format!("status {status}"),
    }
}
