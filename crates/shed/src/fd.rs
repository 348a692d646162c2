//! Raw file descriptor helpers.

use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

/// Lowest fd handed out for exported duplicates. Keeps them clear of the
/// 0..=3 slots rewired in the child.
pub(crate) const EXPORT_FD_FLOOR: RawFd = 100;

/// Whether `fd` is an open socket, via fstat.
pub(crate) fn is_socket(fd: RawFd) -> bool {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

/// Whether the socket at `fd` is connection oriented (`SOCK_STREAM`).
pub(crate) fn is_stream_socket(fd: RawFd) -> io::Result<bool> {
    let mut sock_type: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut sock_type as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sock_type == libc::SOCK_STREAM)
}

/// Whether the socket at `fd` has had `listen` called on it.
pub(crate) fn is_listening(fd: RawFd) -> io::Result<bool> {
    let mut accepting: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut accepting as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(accepting != 0)
}

/// Address family (`AF_INET`, `AF_INET6`, `AF_UNIX`, ...) the socket at `fd`
/// is bound in.
pub(crate) fn socket_family(fd: RawFd) -> io::Result<libc::c_int> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockname(
            fd,
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(libc::c_int::from(storage.ss_family))
}

/// Duplicate `fd` to a new descriptor at or above `floor`, with CLOEXEC set.
pub(crate) fn dup_above(fd: RawFd, floor: RawFd) -> io::Result<OwnedFd> {
    let new_fd = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
    if new_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl just returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Clear `FD_CLOEXEC` so `fd` survives exec.
///
/// Only calls fcntl, so it is safe between fork and exec.
pub(crate) fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close `fd` and report the result. Dropping an owned handle discards it.
pub(crate) fn close(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_socket_detection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(is_socket(listener.as_raw_fd()));
        assert!(is_stream_socket(listener.as_raw_fd()).unwrap());

        let file = tempfile::tempfile().unwrap();
        assert!(!is_socket(file.as_raw_fd()));

        assert!(!is_socket(9999));
        assert!(!is_socket(-1));
    }

    #[test]
    fn test_datagram_is_not_stream() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        assert!(is_socket(socket.as_raw_fd()));
        assert!(!is_stream_socket(socket.as_raw_fd()).unwrap());
    }

    #[test]
    fn test_listening_and_family() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(is_listening(listener.as_raw_fd()).unwrap());
        assert_eq!(socket_family(listener.as_raw_fd()).unwrap(), libc::AF_INET);

        let stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(!is_listening(stream.as_raw_fd()).unwrap());

        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        assert!(!is_listening(left.as_raw_fd()).unwrap());
        assert_eq!(socket_family(left.as_raw_fd()).unwrap(), libc::AF_UNIX);
    }

    #[test]
    fn test_dup_above_floor_sets_cloexec() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dup = dup_above(listener.as_raw_fd(), EXPORT_FD_FLOOR).unwrap();
        assert!(dup.as_raw_fd() >= EXPORT_FD_FLOOR);

        let flags = unsafe { libc::fcntl(dup.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);

        clear_cloexec(dup.as_raw_fd()).unwrap();
        let flags = unsafe { libc::fcntl(dup.as_raw_fd(), libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_close_reports_bad_fd() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dup = dup_above(listener.as_raw_fd(), EXPORT_FD_FLOOR).unwrap();
        let raw = std::os::unix::io::IntoRawFd::into_raw_fd(dup);
        assert!(close(raw).is_ok());
        assert!(close(-1).is_err());
    }
}
