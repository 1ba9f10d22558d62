mod util;

mod caldav;
mod ical;
mod webdav;
