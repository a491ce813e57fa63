//! TE return code rendering
//!
//! A TE return code packs the reporting module into the bits above
//! [`MODULE_SHIFT`] and the error number into the bits below it:
//!
//! ```text
//!   31            22 21                        0
//!  +----------------+---------------------------+
//!  |     module     |          error            |
//!  +----------------+---------------------------+
//! ```
//!
//! Rendered as `MODULE-ERROR`, or `ERROR` alone when the module is empty.

use std::borrow::Cow;

pub const MODULE_SHIFT: u32 = 22;
pub const ERROR_MASK: u32 = (1 << MODULE_SHIFT) - 1;

/// First error number reserved for TE-specific codes
pub const TE_ERRNO_BASE: u32 = 1000;

const MODULES: &[&str] = &[
    "",
    "COMM",
    "RCF",
    "RCF_UNIX",
    "RCF_API",
    "RCF_RPC",
    "RCF_PCH",
    "RPC",
    "RPCS",
    "LOGGER",
    "CS",
    "CONF_API",
    "TAD",
    "TAD_CH",
    "TAD_CSAP",
    "TAD_PKT",
    "TAD_BPS",
    "TAD_CLI",
    "TAPI",
    "TA",
    "TA_UNIX",
    "TA_WIN32",
    "TA_EXT",
    "TA_SWITCH_CTL",
    "TESTER",
    "TRC",
    "IPC",
    "NET",
    "ISCSI_TARGET",
];

/// Linux errno names indexed by value; gaps are aliases
const ERRNO_NAMES: &[&str] = &[
    "OK",
    "EPERM",
    "ENOENT",
    "ESRCH",
    "EINTR",
    "EIO",
    "ENXIO",
    "E2BIG",
    "ENOEXEC",
    "EBADF",
    "ECHILD",
    "EAGAIN",
    "ENOMEM",
    "EACCES",
    "EFAULT",
    "ENOTBLK",
    "EBUSY",
    "EEXIST",
    "EXDEV",
    "ENODEV",
    "ENOTDIR",
    "EISDIR",
    "EINVAL",
    "ENFILE",
    "EMFILE",
    "ENOTTY",
    "ETXTBSY",
    "EFBIG",
    "ENOSPC",
    "ESPIPE",
    "EROFS",
    "EMLINK",
    "EPIPE",
    "EDOM",
    "ERANGE",
    "EDEADLK",
    "ENAMETOOLONG",
    "ENOLCK",
    "ENOSYS",
    "ENOTEMPTY",
    "ELOOP",
    "",
    "ENOMSG",
    "EIDRM",
    "ECHRNG",
    "EL2NSYNC",
    "EL3HLT",
    "EL3RST",
    "ELNRNG",
    "EUNATCH",
    "ENOCSI",
    "EL2HLT",
    "EBADE",
    "EBADR",
    "EXFULL",
    "ENOANO",
    "EBADRQC",
    "EBADSLT",
    "",
    "EBFONT",
    "ENOSTR",
    "ENODATA",
    "ETIME",
    "ENOSR",
    "ENONET",
    "ENOPKG",
    "EREMOTE",
    "ENOLINK",
    "EADV",
    "ESRMNT",
    "ECOMM",
    "EPROTO",
    "EMULTIHOP",
    "EDOTDOT",
    "EBADMSG",
    "EOVERFLOW",
    "ENOTUNIQ",
    "EBADFD",
    "EREMCHG",
    "ELIBACC",
    "ELIBBAD",
    "ELIBSCN",
    "ELIBMAX",
    "ELIBEXEC",
    "EILSEQ",
    "ERESTART",
    "ESTRPIPE",
    "EUSERS",
    "ENOTSOCK",
    "EDESTADDRREQ",
    "EMSGSIZE",
    "EPROTOTYPE",
    "ENOPROTOOPT",
    "EPROTONOSUPPORT",
    "ESOCKTNOSUPPORT",
    "EOPNOTSUPP",
    "EPFNOSUPPORT",
    "EAFNOSUPPORT",
    "EADDRINUSE",
    "EADDRNOTAVAIL",
    "ENETDOWN",
    "ENETUNREACH",
    "ENETRESET",
    "ECONNABORTED",
    "ECONNRESET",
    "ENOBUFS",
    "EISCONN",
    "ENOTCONN",
    "ESHUTDOWN",
    "ETOOMANYREFS",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "EHOSTDOWN",
    "EHOSTUNREACH",
    "EALREADY",
    "EINPROGRESS",
    "ESTALE",
    "EUCLEAN",
    "ENOTNAM",
    "ENAVAIL",
    "EISNAM",
    "EREMOTEIO",
    "EDQUOT",
    "ENOMEDIUM",
    "EMEDIUMTYPE",
    "ECANCELED",
    "ENOKEY",
    "EKEYEXPIRED",
    "EKEYREVOKED",
    "EKEYREJECTED",
    "EOWNERDEAD",
    "ENOTRECOVERABLE",
    "ERFKILL",
    "EHWPOISON",
];

/// Splits a return code into module and error numbers
pub fn split(code: u32) -> (u32, u32) {
    (code >> MODULE_SHIFT, code & ERROR_MASK)
}

/// Packs module and error numbers into a return code
pub fn compose(module: u32, error: u32) -> u32 {
    (module << MODULE_SHIFT) | (error & ERROR_MASK)
}

pub fn module_name(code: u32) -> Cow<'static, str> {
    let (module, _) = split(code);
    match MODULES.get(module as usize) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("MOD{}", module)),
    }
}

pub fn error_name(code: u32) -> Cow<'static, str> {
    let (_, error) = split(code);
    match ERRNO_NAMES.get(error as usize) {
        Some(name) if !name.is_empty() => Cow::Borrowed(name),
        _ if error >= TE_ERRNO_BASE => Cow::Owned(format!("TE_E{}", error)),
        _ => Cow::Owned(format!("E{}", error)),
    }
}

/// `MODULE-ERROR`, or `ERROR` when the module is empty
pub fn render(code: u32) -> String {
    let module = module_name(code);
    let error = error_name(code);
    if module.is_empty() {
        error.into_owned()
    } else {
        format!("{}-{}", module, error)
    }
}
